pub mod audio;
pub mod cache;
pub mod crm;
pub mod llm;
pub mod rag;
pub mod stt;
pub mod telephony;
pub mod tts;
pub mod vad;

// Re-export commonly used types for convenience
pub use stt::{
    BaseSTT, OpenAISTT, STTConfig, STTError, STTProvider, create_stt_provider,
    create_stt_provider_from_enum, get_supported_stt_providers,
};

pub use tts::{
    BaseTTS, ElevenLabsTTS, OpenAITTS, TTSConfig, TTSError, TTSResult, create_tts_provider,
    get_supported_tts_providers,
};

pub use llm::{BaseLLM, ChatMessage, ChatRequest, LLMConfig, LLMError, create_llm_provider};

pub use cache::{AudioCache, CacheError, SyncReport};

pub use rag::{BaseRag, HttpRagClient, InterruptFlag, RagConfig, RagError};

pub use crm::{
    AppointmentRecord, CalendarClient, CallerProfile, CrmConfig, CrmError, DirectoryClient,
    NewAppointment, NewLead, RestCrmClient,
};

pub use telephony::{CallControl, NoopCallControl, TelephonyError, TwilioCallControl};

pub use vad::{ChunkDecision, FrameVad, VadConfig, VadError};

//! Course question answering through the streaming RAG backend.

use futures::StreamExt;
use tracing::{debug, warn};

use super::{AgentDeps, ConversationState, Speaker, SpeakSink, speak};
use crate::agents::phrases;
use crate::core::rag::InterruptFlag;

/// Stream an answer and speak it fragment by fragment.
///
/// Network chunks can split mid-word, so text is buffered until a sentence
/// break before being handed to the speech queue. A barge-in trips the
/// interrupt flag: the producer stops yielding, this loop stops enqueueing,
/// and whatever is left stays unspoken.
pub(super) async fn answer_course_query(
    deps: &AgentDeps,
    state: &mut ConversationState,
    sink: &dyn SpeakSink,
    interrupt: &InterruptFlag,
    input: &str,
) {
    let Some(conversation_id) = state.conversation_id.clone() else {
        speak(state, sink, phrases::TECHNICAL_ERROR).await;
        return;
    };

    interrupt.reset();

    let mut stream = match deps
        .rag
        .rag_query_stream(&conversation_id, input, interrupt.clone())
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "rag query failed to start");
            speak(state, sink, phrases::TECHNICAL_ERROR).await;
            return;
        }
    };

    let mut spoken: Vec<String> = Vec::new();
    let mut pending = String::new();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(text) => {
                pending.push_str(&text);
                while let Some(fragment) = take_speakable_fragment(&mut pending) {
                    if interrupt.is_interrupted() {
                        break;
                    }
                    sink.say(&fragment).await;
                    spoken.push(fragment);
                }
                if interrupt.is_interrupted() {
                    debug!("rag answer interrupted by the caller");
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "rag stream broke mid-answer");
                break;
            }
        }
    }

    let tail = pending.trim();
    if !interrupt.is_interrupted() && !tail.is_empty() {
        sink.say(tail).await;
        spoken.push(tail.to_string());
    }

    if spoken.is_empty() {
        if !interrupt.is_interrupted() {
            speak(state, sink, phrases::TECHNICAL_ERROR).await;
        }
        return;
    }

    let answer = spoken.join(" ");
    state.push_assistant(answer.clone());
    if let Err(e) = deps
        .rag
        .append_history(&conversation_id, Speaker::Assistant.role(), &answer)
        .await
    {
        warn!(error = %e, "could not mirror the answer to the backend history");
    }
}

/// Split the leading fragment ending at a sentence break off `pending`.
///
/// A terminator only counts when followed by whitespace, which keeps
/// decimals ("2.5 jours") and trailing partial sentences intact until more
/// text or the end of the stream arrives.
fn take_speakable_fragment(pending: &mut String) -> Option<String> {
    loop {
        let mut split_end = None;
        let mut iter = pending.char_indices().peekable();
        while let Some((i, c)) = iter.next() {
            if c == '\n' {
                split_end = Some(i + c.len_utf8());
                break;
            }
            if matches!(c, '.' | '!' | '?') {
                if let Some((_, next)) = iter.peek() {
                    if next.is_whitespace() {
                        split_end = Some(i + c.len_utf8());
                        break;
                    }
                }
            }
        }

        let mut cut = split_end?;
        while let Some(c) = pending[cut..].chars().next() {
            if c.is_whitespace() {
                cut += c.len_utf8();
            } else {
                break;
            }
        }

        let fragment: String = pending.drain(..cut).collect();
        let trimmed = fragment.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }
}

use crate::agentcollab::client_wrapper::TokenUsage;
use openai_rust::chat;
use openai_rust2 as openai_rust;
use std::error::Error;
use tokio::sync::Mutex;

/// Path of the chat completions endpoint relative to the base URL.
pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Send a chat request, record its usage, and return the assistant's content.
pub async fn send_and_track(
    api: &openai_rust::Client,
    model: &str,
    formatted_msgs: Vec<chat::Message>,
    temperature: Option<f32>,
    usage_slot: &Mutex<Option<TokenUsage>>,
) -> Result<String, Box<dyn Error + Send + Sync>> {
    let mut chat_arguments = chat::ChatArguments::new(model, formatted_msgs);
    chat_arguments.temperature = temperature;

    let response = api
        .create_chat(chat_arguments, Some(CHAT_COMPLETIONS_PATH.to_string()))
        .await;

    match response {
        Ok(response) => {
            let usage = TokenUsage {
                input_tokens: response.usage.prompt_tokens as usize,
                output_tokens: response.usage.completion_tokens as usize,
                total_tokens: response.usage.total_tokens as usize,
            };

            // Store it for get_last_usage()
            *usage_slot.lock().await = Some(usage);

            match response.choices.first() {
                Some(choice) => Ok(choice.message.content.clone()),
                None => Err("response contained no choices".into()),
            }
        }
        Err(err) => {
            log::error!(
                "agentcollab::clients::common::send_and_track(...): API Error: {}",
                err
            );
            Err(err.to_string().into())
        }
    }
}

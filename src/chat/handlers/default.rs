use async_trait::async_trait;

use crate::{
    chat::{
        handlers::{ChatContext, ChatHandler, ConversationMemory, RoutingType},
        model::{HumanChatMessage, PERSONA_NAME},
    },
    errors::{AppError, AppResult},
    providers::BaseMessage,
};

/// Free-form conversation with the selected language model
#[derive(Default)]
pub struct DefaultChatHandler {
    memory: ConversationMemory,
}

impl DefaultChatHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

pub fn system_prompt(provider_name: &str, local_model_id: &str) -> String {
    format!(
        "You are {PERSONA_NAME}, a conversational assistant living in JupyterLab to help users. \
         You are not a language model, but rather an application built on a foundation model from {provider_name} called {local_model_id}. \
         You are talkative and you provide lots of specific details from the foundation model's context. \
         You may use Markdown to format your response. \
         Code blocks must be formatted in Markdown. \
         Math should be rendered with inline TeX markup, surrounded by $. \
         If you do not know the answer to a question, answer truthfully by responding that you do not know. \
         The following is a friendly conversation between you and a human."
    )
}

/// Body of the human message, with the selected notebook text appended.
pub fn prompt_with_selection(message: &HumanChatMessage) -> String {
    let source = message
        .selection
        .as_ref()
        .and_then(|selection| selection.get("source"))
        .and_then(|source| source.as_str())
        .filter(|source| !source.is_empty());
    match source {
        Some(source) => format!("{}\n\n```\n{}\n```", message.body, source),
        None => message.body.clone(),
    }
}

#[async_trait]
impl ChatHandler for DefaultChatHandler {
    fn id(&self) -> &'static str {
        "default"
    }

    fn name(&self) -> &'static str {
        "Default chat handler"
    }

    fn help(&self) -> &'static str {
        "Responds to prompts that are not otherwise handled by a chat handler"
    }

    fn routing_type(&self) -> RoutingType {
        RoutingType::Default
    }

    async fn process_message(&self, ctx: &ChatContext, message: &HumanChatMessage) -> AppResult<()> {
        let (provider, model_id) = ctx
            .services()
            .config_manager
            .language_model()
            .await?
            .ok_or_else(|| AppError::bad_request("No language model selected"))?;

        let prompt = prompt_with_selection(message);
        let mut messages = vec![BaseMessage::system(system_prompt(&provider.info().name, &model_id))];
        for (human, ai) in self.memory.exchanges() {
            messages.push(BaseMessage::human(human));
            messages.push(BaseMessage::ai(ai));
        }
        messages.push(BaseMessage::human(prompt.clone()));

        let stream = provider.stream(&model_id, &messages).await?;
        let reply = ctx.stream_reply(stream, message).await?;

        self.memory.remember(prompt, reply, ctx.services().chat.history_window);
        Ok(())
    }

    fn clear_memory(&self) {
        self.memory.clear();
    }
}

use async_trait::async_trait;

use crate::{
    chat::{
        handlers::{ChatContext, ChatHandler, RoutingType},
        model::HumanChatMessage,
    },
    errors::AppResult,
};

/// `/clear`: wipe the chat window of every client
pub struct ClearChatHandler;

#[async_trait]
impl ChatHandler for ClearChatHandler {
    fn id(&self) -> &'static str {
        "clear"
    }

    fn name(&self) -> &'static str {
        "Clear chat messages"
    }

    fn help(&self) -> &'static str {
        "Clear the chat window"
    }

    fn routing_type(&self) -> RoutingType {
        RoutingType::slash_command("clear")
    }

    fn uses_llm(&self) -> bool {
        false
    }

    async fn process_message(&self, ctx: &ChatContext, _message: &HumanChatMessage) -> AppResult<()> {
        ctx.hub().clear().await;
        Ok(())
    }
}

use async_trait::async_trait;

use crate::{
    chat::{
        handlers::{ChatContext, ChatHandler, ConversationMemory, RoutingType},
        model::HumanChatMessage,
        retriever::Document,
    },
    errors::{AppError, AppResult},
    providers::BaseMessage,
    usage::CopilotEvent,
};

/// Exchanges remembered for condensing follow-up questions
const MEMORY_WINDOW: usize = 2;
/// Documents retrieved per question
const RETRIEVED_DOCUMENTS: usize = 4;

pub const USAGE: &str = "usage: /ask [query ...]";

pub const RETRIEVAL_ERROR_REPLY: &str = "Sorry, an error occurred while reading the from the learned documents.
If you have changed the embedding provider, try deleting the existing index by running
`/learn -d` command and then re-submitting the `learn <directory>` to learn the documents,
and then asking the question again.";

/// Rephrases a follow-up into a standalone question
pub fn condense_prompt(chat_history: &str, question: &str) -> String {
    format!(
        "Given the following conversation and a follow up question, rephrase the follow up question to be a standalone question.\n\n\
         Chat History:\n{chat_history}\n\
         Follow Up Input: {question}\n\
         Standalone question:"
    )
}

/// Answers a question from retrieved documents
pub fn qa_prompt(documents: &[Document], question: &str) -> String {
    let context = documents
        .iter()
        .map(|d| d.page_content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Use the following pieces of context to answer the question at the end. \
         If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\n\
         {context}\n\n\
         Question: {question}\n\
         Helpful Answer:"
    )
}

fn format_chat_history(exchanges: &[(String, String)]) -> String {
    exchanges
        .iter()
        .map(|(human, ai)| format!("\nHuman: {}\nAssistant: {}", human, ai))
        .collect()
}

/// `/ask`: retrieval-augmented answers over learned documents
#[derive(Default)]
pub struct AskChatHandler {
    memory: ConversationMemory,
}

impl AskChatHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatHandler for AskChatHandler {
    fn id(&self) -> &'static str {
        "ask"
    }

    fn name(&self) -> &'static str {
        "Ask with Local Data"
    }

    fn help(&self) -> &'static str {
        "Ask a question about your learned data"
    }

    fn routing_type(&self) -> RoutingType {
        RoutingType::slash_command("ask")
    }

    async fn process_message(&self, ctx: &ChatContext, message: &HumanChatMessage) -> AppResult<()> {
        let words: Vec<&str> = message.body.split_whitespace().skip(1).collect();
        let query = words.join(" ");
        if query.is_empty() {
            ctx.reply(USAGE, message).await;
            return Ok(());
        }

        let services = ctx.services();
        let (provider, model_id) = services
            .config_manager
            .language_model()
            .await?
            .ok_or_else(|| AppError::bad_request("No language model selected"))?;

        let pending_id = ctx.pending("Searching learned documents", message).await;

        services.usage.send_copilot_event(CopilotEvent {
            event_details: Some("/ask".to_string()),
            event_type: Some("slash".to_string()),
            include_selection: Some(message.selection.is_some()),
            model_type: Some("language".to_string()),
            model_name: Some(model_id.clone()),
            model_provider_id: Some(provider.info().id),
            prompt_word_count: Some(words.len()),
            ..Default::default()
        });

        let answer = async {
            let exchanges = self.memory.exchanges();
            let question = if exchanges.is_empty() {
                query.clone()
            } else {
                let prompt = condense_prompt(&format_chat_history(&exchanges), &query);
                provider.invoke(&model_id, &[BaseMessage::human(prompt)]).await?
            };

            let documents = match services.retriever.relevant_documents(&question, RETRIEVED_DOCUMENTS).await {
                Ok(documents) => documents,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to retrieve learned documents");
                    return Ok(None);
                }
            };

            let answer = provider
                .invoke(&model_id, &[BaseMessage::human(qa_prompt(&documents, &question))])
                .await?;
            Ok::<_, AppError>(Some(answer))
        }
        .await;

        ctx.close_pending(&pending_id).await;

        match answer? {
            Some(answer) => {
                self.memory.remember(query, answer.clone(), MEMORY_WINDOW);
                ctx.reply(answer, message).await;
            }
            None => ctx.reply(RETRIEVAL_ERROR_REPLY, message).await,
        }
        Ok(())
    }

    fn clear_memory(&self) {
        self.memory.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qa_prompt_stuffs_documents() {
        let documents = vec![
            Document { page_content: "Spark runs on YARN.".into(), source: "a.md".into() },
            Document { page_content: "Impala is a SQL engine.".into(), source: "b.md".into() },
        ];
        let prompt = qa_prompt(&documents, "What is Impala?");
        assert!(prompt.contains("Spark runs on YARN.\n\nImpala is a SQL engine.\n\nQuestion: What is Impala?"));
        assert!(prompt.ends_with("Helpful Answer:"));
    }

    #[test]
    fn test_condense_prompt_includes_history() {
        let history = format_chat_history(&[("What is CML?".into(), "A platform.".into())]);
        assert_eq!(history, "\nHuman: What is CML?\nAssistant: A platform.");
        let prompt = condense_prompt(&history, "Who makes it?");
        assert!(prompt.contains("Chat History:\n\nHuman: What is CML?"));
        assert!(prompt.ends_with("Follow Up Input: Who makes it?\nStandalone question:"));
    }
}

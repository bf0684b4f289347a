use std::path::{Path, PathBuf};

use async_trait::async_trait;
use walkdir::{DirEntry, WalkDir};

use crate::{
    chat::{
        handlers::{ChatContext, ChatHandler, RoutingType},
        model::HumanChatMessage,
        retriever::{Document, split_text},
    },
    errors::{AppError, AppResult},
};

pub const USAGE: &str = "usage: /learn [-d] [path]";

/// File extensions `/learn` reads
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "py", "md", "r", "rmd", "jl", "sh", "ipynb", "js", "ts", "jsx", "tsx", "txt", "html", "tex", "sql",
    "json", "yaml", "yml", "toml",
];

/// Chunks sent to the embedding endpoint per request
pub const EMBEDDING_BATCH_SIZE: usize = 64;

pub const DELETED_REPLY: &str = "👍 I have deleted everything I previously learned.";
pub const NO_EMBEDDING_MODEL_REPLY: &str =
    "Sorry, please select an embedding provider before using the `/learn` command.";

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_str().is_some_and(|name| name.starts_with('.'))
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Read every supported, non-hidden text file under `root` and split it into chunks.
pub fn collect_documents(root: &Path, chunk_size: usize, chunk_overlap: usize) -> Vec<Document> {
    let mut documents = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && is_supported(entry.path()))
    {
        let text = match std::fs::read_to_string(entry.path()) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "Skipping unreadable file");
                continue;
            }
        };
        let source = entry.path().display().to_string();
        documents.extend(split_text(&text, chunk_size, chunk_overlap).into_iter().map(|chunk| Document {
            page_content: chunk,
            source: source.clone(),
        }));
    }
    documents
}

/// Resolve `relative` under `root_dir`, refusing paths that escape it.
pub fn resolve_learn_path(root_dir: &Path, relative: &str) -> AppResult<PathBuf> {
    let root = root_dir
        .canonicalize()
        .map_err(|e| AppError::ConfigError(format!("Invalid chat root dir {}: {}", root_dir.display(), e)))?;
    let path = root
        .join(relative)
        .canonicalize()
        .map_err(|_| AppError::bad_request(format!("Sorry, that path doesn't exist: {}", relative)))?;
    if !path.starts_with(&root) {
        return Err(AppError::bad_request(format!(
            "Sorry, the path {} is outside of the server root directory",
            relative
        )));
    }
    Ok(path)
}

/// `/learn`: index local files for `/ask`
#[derive(Default)]
pub struct LearnChatHandler;

impl LearnChatHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChatHandler for LearnChatHandler {
    fn id(&self) -> &'static str {
        "learn"
    }

    fn name(&self) -> &'static str {
        "Learn Local Data"
    }

    fn help(&self) -> &'static str {
        "Teach Copilot about files on your system"
    }

    fn routing_type(&self) -> RoutingType {
        RoutingType::slash_command("learn")
    }

    fn uses_llm(&self) -> bool {
        false
    }

    async fn process_message(&self, ctx: &ChatContext, message: &HumanChatMessage) -> AppResult<()> {
        let args: Vec<&str> = message.body.split_whitespace().skip(1).collect();
        let services = ctx.services();

        if args.first() == Some(&"-d") {
            services.index.clear().await;
            tracing::info!("Learned documents deleted");
            ctx.reply(DELETED_REPLY, message).await;
            return Ok(());
        }

        let relative = args.join(" ");
        if relative.is_empty() {
            ctx.reply(USAGE, message).await;
            return Ok(());
        }

        let Some((provider, model_id)) = services.config_manager.embedding_model().await? else {
            ctx.reply(NO_EMBEDDING_MODEL_REPLY, message).await;
            return Ok(());
        };

        let path = match resolve_learn_path(&services.chat.root_dir, &relative) {
            Ok(path) => path,
            Err(AppError::BadRequest(reply)) => {
                ctx.reply(reply, message).await;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let pending_id = ctx
            .pending(format!("Loading and splitting files for {}", relative), message)
            .await;

        let result = async {
            let (chunk_size, chunk_overlap) = (services.chat.chunk_size, services.chat.chunk_overlap);
            let documents =
                tokio::task::spawn_blocking(move || collect_documents(&path, chunk_size, chunk_overlap))
                    .await
                    .map_err(|e| AppError::internal("failed to read files", serde_json::json!({ "error": e.to_string() })))?;
            if documents.is_empty() {
                return Ok(0);
            }

            let mut vectors = Vec::with_capacity(documents.len());
            for batch in documents.chunks(EMBEDDING_BATCH_SIZE) {
                let texts: Vec<String> = batch.iter().map(|d| d.page_content.clone()).collect();
                vectors.extend(provider.embed_documents(&model_id, &texts).await?);
            }
            let count = documents.len();
            services.index.add(documents, vectors).await?;
            Ok::<_, AppError>(count)
        }
        .await;

        ctx.close_pending(&pending_id).await;

        match result? {
            0 => ctx.reply(format!("Sorry, I could not find any documents to learn in {}", relative), message).await,
            count => {
                tracing::info!(path = %relative, chunks = count, "Learned documents");
                ctx.reply(
                    format!(
                        "🎉 I have learned documents at **{}** and I am ready to answer questions about them. \
                         You can ask questions about these docs by prefixing your message with **/ask**.",
                        relative
                    ),
                    message,
                )
                .await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_skips_hidden_and_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "abcdefghij").unwrap();
        std::fs::write(dir.path().join("image.png"), [0u8, 1, 2]).unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git").join("config.txt"), "hidden").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src").join("main.py"), "pass").unwrap();

        let documents = collect_documents(dir.path(), 6, 2);
        let mut contents: Vec<&str> = documents.iter().map(|d| d.page_content.as_str()).collect();
        contents.sort();
        assert_eq!(contents, vec!["abcdef", "efghij", "pass"]);
    }

    #[test]
    fn test_resolve_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();

        assert!(resolve_learn_path(dir.path(), "docs").is_ok());
        assert!(matches!(resolve_learn_path(dir.path(), "missing"), Err(AppError::BadRequest(_))));
        assert!(matches!(resolve_learn_path(dir.path(), ".."), Err(AppError::BadRequest(_))));
    }
}

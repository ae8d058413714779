use anyhow::{Context, Result};
use code_studio::cli::Args;
use code_studio::collaborator::ProviderCollaborator;
use code_studio::config::StudioConfig;
use code_studio::conversation::ConversationEvent;
use code_studio::logging::{setup_logging, setup_logging_for_repl};
use code_studio::preview::DirectoryPreviewSink;
use code_studio::tools::ToolRegistry;
use code_studio::transcript::TranscriptPrinter;
use code_studio::widgets::WidgetRegistry;
use code_studio::{ChatController, ChatError, MessageStatus};
use llm::recording::PlaybackState;
use llm::{GeminiClient, LLMProvider};
use rustyline::{error::ReadlineError, history::DefaultHistory, Config, Editor};
use std::sync::Arc;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    let args = Args::parse();

    if args.task.is_some() {
        setup_logging(args.verbose);
    } else {
        setup_logging_for_repl(args.verbose);
    }

    let config = StudioConfig::load(args.config.as_deref())?;
    let controller = build_controller(&args, &config)?;
    let widgets = WidgetRegistry::with_default_widgets();

    match &args.task {
        Some(task) => {
            let status = run_turn(&controller, &widgets, task).await?;
            if let MessageStatus::Failed(failure) = status {
                anyhow::bail!("Response failed: {failure}");
            }
            Ok(())
        }
        None => run_repl(&controller, &widgets).await,
    }
}

fn build_provider(args: &Args, config: &StudioConfig) -> Result<Box<dyn LLMProvider>> {
    let model = args.model.clone().unwrap_or_else(|| config.model.clone());
    let base_url = args
        .base_url
        .clone()
        .unwrap_or_else(|| config.base_url.clone());
    let api_key = config.resolve_api_key(args.api_key.as_deref());

    let mut client = match &args.playback {
        Some(path) => {
            let playback = PlaybackState::from_file(path, args.fast_playback)
                .with_context(|| format!("Failed to load recording {}", path.display()))?;
            info!(
                "Playing back {} recorded session(s) from {}",
                playback.session_count(),
                path.display()
            );
            GeminiClient::new(api_key.unwrap_or_default(), model, base_url).with_playback(playback)
        }
        None => {
            let api_key = api_key.context(
                "No API key found. Pass --api-key, set api_key in settings.json or set GEMINI_API_KEY",
            )?;
            GeminiClient::new(api_key, model, base_url)
        }
    };
    if let Some(path) = &args.record {
        client = client.with_recorder(path);
    }
    Ok(Box::new(client))
}

fn build_controller(args: &Args, config: &StudioConfig) -> Result<ChatController> {
    let provider = build_provider(args, config)?;
    let max_steps = args.max_steps.unwrap_or(config.max_steps);
    let collaborator =
        ProviderCollaborator::new(provider, ToolRegistry::with_default_tools(), max_steps);

    let mut controller = ChatController::new(Arc::new(collaborator), config.system_prompt.clone());
    if let Some(timeout) = config.idle_timeout() {
        controller = controller.with_idle_timeout(timeout);
    }
    if let Some(dir) = &args.preview_dir {
        controller = controller.with_preview(Arc::new(DirectoryPreviewSink::new(dir)));
    }
    Ok(controller)
}

/// Send one message and print the reply as it streams. Ctrl-C cancels the reply.
async fn run_turn(
    controller: &ChatController,
    widgets: &WidgetRegistry,
    text: &str,
) -> Result<MessageStatus> {
    let store = controller.store();
    let updates = store.lock().subscribe();
    let handle = controller.send(text).await?;
    let message_id = handle.message_id().to_string();

    let mut printer = TranscriptPrinter::new(widgets, std::io::stdout());
    let printing = async {
        while let Ok(event) = updates.recv().await {
            if let ConversationEvent::Updated(message) = event {
                if message.id != message_id {
                    continue;
                }
                if message.status.is_final() {
                    break;
                }
                printer.update(&message)?;
            }
        }
        Ok::<(), std::io::Error>(())
    };

    tokio::select! {
        printed = printing => printed?,
        _ = tokio::signal::ctrl_c() => {
            debug!("Ctrl-C during streaming");
            controller.cancel(&handle);
        }
    }

    let status = handle.wait().await?;
    let message = store
        .lock()
        .get(&message_id)
        .cloned()
        .context("Assistant message disappeared from the conversation")?;
    printer.finish(&message)?;
    Ok(status)
}

async fn run_repl(controller: &ChatController, widgets: &WidgetRegistry) -> Result<()> {
    let config = Config::builder()
        .edit_mode(rustyline::EditMode::Emacs)
        .build();
    let mut editor: Editor<(), DefaultHistory> =
        Editor::with_config(config).context("Failed to create line editor")?;

    println!("Type a message, Ctrl-C cancels a reply, Ctrl-D exits.");
    loop {
        let line = match editor.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let _ = editor.add_history_entry(line.as_str());

        match run_turn(controller, widgets, &line).await {
            Ok(_) => {}
            Err(e) => match e.downcast_ref::<ChatError>() {
                Some(ChatError::Validation(_)) => continue,
                Some(error) => println!("{error}"),
                None => return Err(e),
            },
        }
        println!();
    }
    Ok(())
}

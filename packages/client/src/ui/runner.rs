//! Client execution logic: readline thread, session task and render loop.

use std::{path::Path, sync::Arc};

use madang_shared::time::{Clock, SystemClock};
use rustyline::{DefaultEditor, error::ReadlineError};
use tokio::sync::mpsc;

use crate::{
    client::{ChatSession, ClientConfig, SessionCommand, SessionDeps, SessionHandle, SessionUpdate},
    domain::{CredentialStore, FileUpload, Identity, LoginId, RoomId, RoomSnapshot},
    error::ClientError,
    infrastructure::{
        api::HttpChatApi, credential::MemoryCredentialStore, transport::WebSocketConnector,
    },
};

use super::{
    formatter::MessageFormatter,
    prompt::{HELP, InputAction, parse_input, redisplay_prompt},
};

/// Run the chat client until the user quits or the session is ended by the server.
///
/// Returns `Err(ClientError::Unauthorized)` when the credential was rejected.
pub async fn run_client(
    config: ClientConfig,
    identity: Identity,
    token: Option<String>,
) -> Result<(), ClientError> {
    let credentials: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new(token));
    let api = Arc::new(
        HttpChatApi::new(
            config.api_url.clone(),
            credentials.clone(),
            config.request_timeout,
        )
        .map_err(ClientError::Api)?,
    );
    let connector = Arc::new(WebSocketConnector::new(
        config.ws_url.clone(),
        config.handshake_timeout,
    ));
    tracing::info!(
        "Connecting as '{}' (api {}, broker {})",
        identity.login_id,
        config.api_url,
        config.ws_url
    );

    let (session, handle, updates) = ChatSession::new(SessionDeps {
        identity: identity.clone(),
        api,
        connector,
        credentials,
        duplicate_policy: config.duplicate_policy,
    });
    let session_task = tokio::spawn(session.run());

    println!(
        "\nYou are '{}' (@{}). Type /help for commands, /quit to exit.\n",
        identity.display_name, identity.login_id
    );
    if let Some(room_id) = config.initial_room {
        handle.send(SessionCommand::OpenRoom(room_id));
    }

    let input = spawn_readline(identity.login_id.clone());
    let result = render_loop(View::new(identity.login_id), handle, updates, input, &SystemClock).await;

    if let Err(e) = session_task.await {
        tracing::error!("Session task failed: {}", e);
    }
    result
}

/// Spawn a blocking thread for rustyline (synchronous readline)
fn spawn_readline(login_id: LoginId) -> mpsc::UnboundedReceiver<String> {
    let (input_tx, input_rx) = mpsc::unbounded_channel::<String>();

    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                eprintln!("Failed to initialize readline: {}", e);
                return;
            }
        };

        let prompt = format!("{}> ", login_id);

        loop {
            match rl.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        rl.add_history_entry(line).ok();
                        if input_tx.send(line.to_string()).is_err() {
                            break;
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    tracing::info!("Interrupted");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    tracing::info!("EOF");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {}", err);
                    break;
                }
            }
        }
    });

    input_rx
}

enum Event {
    Line(Option<String>),
    Update(Option<SessionUpdate>),
}

async fn render_loop(
    mut view: View,
    handle: SessionHandle,
    mut updates: mpsc::UnboundedReceiver<SessionUpdate>,
    mut input: mpsc::UnboundedReceiver<String>,
    clock: &dyn Clock,
) -> Result<(), ClientError> {
    let mut input_open = true;

    loop {
        let event = tokio::select! {
            line = input.recv(), if input_open => Event::Line(line),
            update = updates.recv() => Event::Update(update),
        };

        match event {
            Event::Line(Some(line)) => view.handle_input(&handle, &line).await,
            Event::Line(None) => {
                // Ctrl+C / Ctrl+D: log out and wait for the session to confirm
                input_open = false;
                handle.send(SessionCommand::Logout);
            }
            Event::Update(Some(SessionUpdate::LoggedOut { reason })) => {
                print!("{}", MessageFormatter::format_logged_out(reason.as_ref()));
                return reason.map_or(Ok(()), Err);
            }
            Event::Update(Some(update)) => {
                print!("{}", view.render(update, clock.now_millis()));
                redisplay_prompt(&view.me);
            }
            Event::Update(None) => return Ok(()),
        }
    }
}

/// What the terminal currently shows, plus the bits of state local commands need.
struct View {
    me: LoginId,
    snapshot: Option<RoomSnapshot>,
    last_notification: Option<RoomId>,
    unsent: Option<String>,
}

impl View {
    fn new(me: LoginId) -> Self {
        Self {
            me,
            snapshot: None,
            last_notification: None,
            unsent: None,
        }
    }

    async fn handle_input(&mut self, handle: &SessionHandle, line: &str) {
        let command = match parse_input(line) {
            InputAction::Command(command) => command,
            InputAction::UploadFile(path) => match read_upload(&path).await {
                Ok(upload) => SessionCommand::SendFile(upload),
                Err(e) => {
                    println!("! cannot read {}: {}", path.display(), e);
                    return;
                }
            },
            InputAction::OpenLastNotification => match self.last_notification {
                Some(room_id) => SessionCommand::OpenRoom(room_id),
                None => {
                    println!("! no notification to open");
                    return;
                }
            },
            InputAction::Retry => match self.unsent.take() {
                Some(text) => SessionCommand::SendText(text),
                None => {
                    println!("! nothing to retry");
                    return;
                }
            },
            InputAction::ShowParticipants => {
                match &self.snapshot {
                    Some(snapshot) => {
                        print!("{}", MessageFormatter::format_participants(snapshot, &self.me))
                    }
                    None => println!("! no room is open"),
                }
                return;
            }
            InputAction::Help => {
                println!("{}", HELP);
                return;
            }
            InputAction::Invalid(message) => {
                println!("! {}", message);
                return;
            }
        };

        if !handle.send(command) {
            tracing::warn!("Session has ended; input ignored");
        }
    }

    /// Apply `update` to the view and return the text to print.
    fn render(&mut self, update: SessionUpdate, received_at: i64) -> String {
        match update {
            SessionUpdate::RoomOpened { snapshot, messages } => {
                let output = MessageFormatter::format_room_opened(&snapshot, &messages);
                self.snapshot = Some(snapshot);
                output
            }
            SessionUpdate::RoomDetails(snapshot) => {
                let output = MessageFormatter::format_room_details(&snapshot);
                self.snapshot = Some(snapshot);
                output
            }
            SessionUpdate::MessageAppended(message) => {
                format!("\n{}", MessageFormatter::format_message(&message))
            }
            SessionUpdate::Typing { sender_name, .. } => {
                MessageFormatter::format_typing(&sender_name)
            }
            SessionUpdate::Notification(event) => {
                self.last_notification = Some(event.room_id);
                MessageFormatter::format_notification(&event, received_at)
            }
            SessionUpdate::SendRejected { text, error } => {
                let output = MessageFormatter::format_send_rejected(text.as_deref(), &error);
                if matches!(error, ClientError::NotConnected) {
                    self.unsent = text;
                }
                output
            }
            SessionUpdate::RoomLeft(room_id) => {
                self.snapshot = None;
                MessageFormatter::format_room_left(room_id)
            }
            SessionUpdate::Rooms(rooms) => MessageFormatter::format_rooms(&rooms),
            SessionUpdate::Users(users) => MessageFormatter::format_users(&users),
            SessionUpdate::ConnectionLost { scope, reason } => {
                MessageFormatter::format_connection_lost(&scope, &reason)
            }
            SessionUpdate::Error(error) => MessageFormatter::format_error(&error),
            SessionUpdate::LoggedOut { reason } => {
                MessageFormatter::format_logged_out(reason.as_ref())
            }
        }
    }
}

/// Read a file from disk for upload, guessing its MIME type from the extension.
async fn read_upload(path: &Path) -> std::io::Result<FileUpload> {
    let bytes = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let mime_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string();
    Ok(FileUpload {
        file_name,
        mime_type,
        bytes,
    })
}

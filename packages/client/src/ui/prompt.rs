//! Prompt handling and input parsing.

use std::{io::Write, path::PathBuf};

use crate::{
    client::SessionCommand,
    domain::{LoginId, RoomId},
};

pub const HELP: &str = "\
Commands:
  /open <roomId>             open a room
  /dm <loginId>              open the private room with a user
  /group <name> <loginId>... create a group room
  /file <path>               upload a file to the open room
  /typing                    send a typing indicator
  /leave                     leave the open room
  /rooms                     list your rooms
  /users                     list other users
  /who                       show participants of the open room
  /go                        open the room of the last notification
  /retry                     send the last rejected message again
  /reconnect                 reopen the notification stream after it dropped
  /quit                      log out and exit
Anything else is sent as a message.";

/// What a line of input asks for.
#[derive(Debug, PartialEq, Eq)]
pub enum InputAction {
    Command(SessionCommand),
    UploadFile(PathBuf),
    ShowParticipants,
    OpenLastNotification,
    Retry,
    Help,
    Invalid(String),
}

/// Redisplay the prompt after printing output
pub fn redisplay_prompt(login_id: &LoginId) {
    print!("{}> ", login_id);
    std::io::stdout().flush().ok();
}

pub fn parse_input(line: &str) -> InputAction {
    let Some(command_line) = line.strip_prefix('/') else {
        return InputAction::Command(SessionCommand::SendText(line.to_string()));
    };

    let mut words = command_line.split_whitespace();
    let name = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    match (name, args.as_slice()) {
        ("open", [room]) => match room.parse::<RoomId>() {
            Ok(room_id) => InputAction::Command(SessionCommand::OpenRoom(room_id)),
            Err(e) => InputAction::Invalid(e.to_string()),
        },
        ("dm", [friend]) => match LoginId::new(*friend) {
            Ok(friend) => InputAction::Command(SessionCommand::OpenPrivateChat(friend)),
            Err(e) => InputAction::Invalid(e.to_string()),
        },
        ("group", [room_name, members @ ..]) if !members.is_empty() => {
            match members
                .iter()
                .map(|m| LoginId::new(*m))
                .collect::<Result<Vec<_>, _>>()
            {
                Ok(members) => InputAction::Command(SessionCommand::CreateGroupRoom {
                    room_name: Some(room_name.to_string()),
                    members,
                }),
                Err(e) => InputAction::Invalid(e.to_string()),
            }
        }
        ("file", [_, ..]) => InputAction::UploadFile(PathBuf::from(args.join(" "))),
        ("typing", []) => InputAction::Command(SessionCommand::SendTyping),
        ("leave", []) => InputAction::Command(SessionCommand::LeaveRoom),
        ("rooms", []) => InputAction::Command(SessionCommand::ListRooms),
        ("users", []) => InputAction::Command(SessionCommand::ListUsers),
        ("quit", []) => InputAction::Command(SessionCommand::Logout),
        ("who", []) => InputAction::ShowParticipants,
        ("go", []) => InputAction::OpenLastNotification,
        ("retry", []) => InputAction::Retry,
        ("reconnect", []) => InputAction::Command(SessionCommand::RestartNotifications),
        ("help", []) => InputAction::Help,
        _ => InputAction::Invalid(format!("unknown command: /{} (try /help)", command_line)),
    }
}

use smtp2api_common::{internal, status::Status};
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Event, Response, Session};
use crate::{
    command::{Command, HeloVariant},
    error::ProtocolError,
    state::{Close, Reading, State},
};

const HELP: &str = "Supported commands: HELO EHLO MAIL RCPT DATA RSET NOOP HELP QUIT";

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    pub(super) fn greeting(&self) -> Response {
        self.single(
            Status::ServiceReady,
            &format!("{} ESMTP smtp2api ready", self.config.banner),
        )
    }

    pub(super) fn single(&self, status: Status, message: &str) -> Response {
        let event = if self.state.should_close() {
            Event::ConnectionClose
        } else {
            Event::ConnectionKeepAlive
        };

        (Some(vec![format!("{status} {message}")]), event)
    }

    /// Reply 421 and move to [`State::Close`]
    pub(super) fn close_with(&mut self, message: String) -> Response {
        self.state = State::Close(Close);
        self.single(Status::Unavailable, &message)
    }

    /// Reply to a command the state machine accepted
    pub(super) fn reply(&mut self, command: &Command) -> Response {
        match command {
            Command::Helo(HeloVariant::Ehlo(id)) => {
                let size = match self.config.max_message_size {
                    0 => String::from("SIZE"),
                    maximum => format!("SIZE {maximum}"),
                };

                let mut lines = vec![
                    format!("{}-{} says hello to {id}", Status::Ok, self.config.banner),
                    format!("{}-{size}", Status::Ok),
                ];
                lines.extend(
                    ["8BITMIME", "PIPELINING"]
                        .iter()
                        .map(|extension| format!("{}-{extension}", Status::Ok)),
                );
                lines.push(format!("{} HELP", Status::Ok));

                (Some(lines), Event::ConnectionKeepAlive)
            }
            Command::Helo(HeloVariant::Helo(id)) => self.single(
                Status::Ok,
                &format!("{} says hello to {id}", self.config.banner),
            ),
            Command::Data => {
                self.state = State::Reading(Reading);
                self.single(Status::StartMailInput, "End data with <CR><LF>.<CR><LF>")
            }
            Command::Help => self.single(Status::HelpMessage, HELP),
            Command::Quit => self.single(Status::GoodBye, "Bye"),
            Command::MailFrom(..) | Command::RcptTo(_) | Command::Rset | Command::Noop => {
                self.single(Status::Ok, "Ok")
            }
        }
    }

    /// Reply to a rejected command, closing the connection once the client
    /// has misbehaved `max_errors` times in a row
    pub(super) fn protocol_error(&mut self, err: &ProtocolError) -> Response {
        if err.is_client_misbehaviour() {
            self.errors += 1;

            if self.config.max_errors > 0 && self.errors >= self.config.max_errors {
                internal!(
                    level = WARN,
                    "Closing connection after {} consecutive errors",
                    self.errors
                );

                return self.close_with(format!(
                    "{} too many errors, closing connection",
                    self.config.banner
                ));
            }
        }

        internal!(level = DEBUG, "Rejected in {}: {err}", self.state);
        self.single(err.status(), &err.to_string())
    }
}

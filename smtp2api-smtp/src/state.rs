use core::fmt::{self, Display, Formatter};

use smtp2api_common::{address::Address, envelope::Envelope};

use crate::{
    command::{Command, HeloVariant},
    error::ProtocolError,
};

pub(crate) const NEED_MAIL_BEFORE_RCPT: &str = "Need MAIL before RCPT";

/// Per-connection protocol context, mutated by [`State::transition`]
#[derive(Debug, Default, Clone)]
pub struct Context {
    /// Identity the client gave in HELO/EHLO, empty until greeted
    pub id: String,
    /// Whether the client greeted with EHLO
    pub extended: bool,
    pub envelope: Envelope,
    /// `0` means unlimited
    pub max_message_size: usize,
}

impl Context {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            ..Self::default()
        }
    }
}

/// Initial connection state - client just connected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connect;

/// After successful EHLO command (extended SMTP)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ehlo {
    pub id: String,
}

/// After successful HELO command (basic SMTP)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Helo {
    pub id: String,
}

/// After MAIL FROM command (beginning of mail transaction)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailFrom {
    pub sender: Option<Address>,
}

/// After RCPT TO command (at least one recipient)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RcptTo {
    pub sender: Option<Address>,
}

/// After DATA command, before the 354 reply went out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Data;

/// Reading message data, until the end-of-data marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading;

/// Message complete and handed over for dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostDot;

/// Client issued QUIT command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quit;

/// Connection closing on the server's initiative
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Close;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Connect(Connect),
    Ehlo(Ehlo),
    Helo(Helo),
    MailFrom(MailFrom),
    RcptTo(RcptTo),
    Data(Data),
    Reading(Reading),
    PostDot(PostDot),
    Quit(Quit),
    Close(Close),
}

impl Default for State {
    fn default() -> Self {
        Self::Connect(Connect)
    }
}

impl Display for State {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::Connect(_) => "Connect",
            Self::Ehlo(_) => "EHLO",
            Self::Helo(_) => "HELO",
            Self::MailFrom(_) => "MAIL",
            Self::RcptTo(_) => "RCPT",
            Self::Data(_) => "DATA",
            Self::Reading(_) => "Reading",
            Self::PostDot(_) => "PostDot",
            Self::Quit(_) => "QUIT",
            Self::Close(_) => "Close",
        })
    }
}

impl State {
    /// The state a client returns to after RSET or a finished message:
    /// whatever its greeting established, or [`Connect`] if it never greeted.
    pub fn greeted(ctx: &Context) -> Self {
        if ctx.id.is_empty() {
            Self::Connect(Connect)
        } else if ctx.extended {
            Self::Ehlo(Ehlo { id: ctx.id.clone() })
        } else {
            Self::Helo(Helo { id: ctx.id.clone() })
        }
    }

    /// Transition from the current state based on a received command.
    ///
    /// A rejected command leaves both the state and `ctx` untouched, the
    /// caller keeps `self`.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::OutOfSequence`] when the command is not allowed
    /// here, [`ProtocolError::SizeExceeded`] for a `MAIL FROM` declaring a
    /// size above the limit.
    pub fn transition(&self, command: Command, ctx: &mut Context) -> Result<Self, ProtocolError> {
        match (self, command) {
            // Greeting is always accepted and abandons any open transaction
            (_, Command::Helo(variant)) => {
                ctx.envelope.clear();
                Ok(match variant {
                    HeloVariant::Ehlo(id) => {
                        ctx.id.clone_from(&id);
                        ctx.extended = true;
                        Self::Ehlo(Ehlo { id })
                    }
                    HeloVariant::Helo(id) => {
                        ctx.id.clone_from(&id);
                        ctx.extended = false;
                        Self::Helo(Helo { id })
                    }
                })
            }

            (Self::Ehlo(_) | Self::Helo(_) | Self::PostDot(_), Command::MailFrom(sender, params)) => {
                if let Some(declared) = params.size()
                    && ctx.max_message_size > 0
                    && declared > ctx.max_message_size
                {
                    return Err(ProtocolError::SizeExceeded {
                        declared,
                        maximum: ctx.max_message_size,
                    });
                }

                ctx.envelope.clear();
                ctx.envelope.sender_mut().clone_from(&sender);
                Ok(Self::MailFrom(MailFrom { sender }))
            }
            (Self::Connect(_), Command::MailFrom(..)) => {
                Err(ProtocolError::OutOfSequence("Send HELO/EHLO first"))
            }
            (Self::MailFrom(_) | Self::RcptTo(_), Command::MailFrom(..)) => {
                Err(ProtocolError::OutOfSequence("Sender already specified"))
            }

            (Self::MailFrom(MailFrom { sender }) | Self::RcptTo(RcptTo { sender }), Command::RcptTo(recipient)) => {
                ctx.envelope.add_recipient(recipient);
                Ok(Self::RcptTo(RcptTo {
                    sender: sender.clone(),
                }))
            }
            (_, Command::RcptTo(_)) => Err(ProtocolError::OutOfSequence(NEED_MAIL_BEFORE_RCPT)),

            (Self::RcptTo(_), Command::Data) if ctx.envelope.has_recipients() => Ok(Self::Data(Data)),
            (Self::MailFrom(_) | Self::RcptTo(_), Command::Data) => {
                Err(ProtocolError::OutOfSequence("Need RCPT before DATA"))
            }
            (_, Command::Data) => Err(ProtocolError::OutOfSequence("Need MAIL before DATA")),

            (_, Command::Rset) => {
                ctx.envelope.clear();
                Ok(Self::greeted(ctx))
            }

            (_, Command::Quit) => Ok(Self::Quit(Quit)),

            (state, Command::Noop | Command::Help) => Ok(state.clone()),

            (_, Command::MailFrom(..)) => Err(ProtocolError::OutOfSequence("Bad sequence of commands")),
        }
    }

    /// Whether this state ends the connection
    pub const fn should_close(&self) -> bool {
        matches!(self, Self::Quit(_) | Self::Close(_))
    }

    /// Whether `RCPT TO` is allowed here
    pub const fn accepts_recipients(&self) -> bool {
        matches!(self, Self::MailFrom(_) | Self::RcptTo(_))
    }
}

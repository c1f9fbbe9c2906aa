//! Demonstration service: echoes every framed payload it receives back onto
//! the session it arrived on. Exercises the full network path end to end -
//! `network_connect`/`network_recv`/`network_close` arriving as ordinary
//! dispatched messages, replies leaving through [`loom::Context::send_session`].

use loom::service::{Context, Service};
use loom::{Buffer, Message, MessageType};
use weave::logging::{self, Logger};

pub struct Echo {
    log: Logger,
}

impl Echo {
    pub fn new(log: Logger) -> Echo {
        Echo { log }
    }
}

impl Service for Echo {
    fn dispatch(&mut self, ctx: &mut Context, msg: &Message) {
        match msg.msg_type() {
            MessageType::NetworkConnect => {
                logging::info!(self.log, "connect"; "session" => ?msg.session());
            }
            MessageType::NetworkRecv => {
                if let Some(session) = msg.session() {
                    ctx.send_session(session, Buffer::from_slice(msg.bytes(), 0));
                }
            }
            MessageType::NetworkClose => {
                logging::info!(self.log, "close"; "session" => ?msg.session());
            }
            MessageType::NetworkError | MessageType::NetworkLogicError => {
                logging::warn!(self.log, "network error"; "session" => ?msg.session(), "category" => ?msg.network_error());
            }
            _ => {}
        }
    }
}

//! CAP negotiation: LS, LIST, REQ, END.
//!
//! CAP before registration holds the handshake open until CAP END; a
//! registered client may still REQ to toggle capabilities, firing the
//! cap_change hook so derived bits stay in sync.

use std::sync::Arc;

use async_trait::async_trait;
use solanum_proto::{MsgBuf, Numeric};

use super::{register, Handler};
use crate::caps::paginate;
use crate::context::CoreContext;
use crate::error::HandlerResult;
use crate::hooks::CapChange;
use crate::send;
use crate::state::Client;

/// Pagination limit for CAP LS lines.
const CAP_LINE_LIMIT: usize = 400;

pub struct CapHandler;

#[async_trait]
impl Handler for CapHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        let sub = msg.params[0].to_ascii_uppercase();
        match sub.as_str() {
            "LS" => {
                hold_registration(client);
                let with_values = msg.params.get(1).map(String::as_str) == Some("302");
                let words = ctx.client_caps.index.advertised(client, with_values);
                send_multiline(ctx, client, "LS", &words);
            }
            "LIST" => {
                let words: Vec<String> = ctx
                    .client_caps
                    .index
                    .advertised(client, false)
                    .into_iter()
                    .filter(|name| {
                        ctx.client_caps
                            .index
                            .mask_of(name)
                            .is_some_and(|mask| client.caps() & mask != 0)
                    })
                    .collect();
                send_multiline(ctx, client, "LIST", &words);
            }
            "REQ" => {
                hold_registration(client);
                let request = msg.params.get(1).cloned().unwrap_or_default();
                match ctx.client_caps.index.resolve_req(&request) {
                    Some((add, remove)) => {
                        let remove = removable_mask(ctx, remove);
                        client.add_caps(add);
                        client.clear_caps(remove);
                        reply(ctx, client, "ACK", &request);
                        ctx.hooks.cap_change.call(
                            ctx,
                            &mut CapChange {
                                client: client.clone(),
                            },
                        );
                    }
                    None => reply(ctx, client, "NAK", &request),
                }
            }
            "END" => {
                let was_negotiating = {
                    let mut prereg = client.prereg.write();
                    match prereg.as_mut() {
                        Some(state) if state.cap_negotiating => {
                            state.cap_negotiating = false;
                            true
                        }
                        _ => false,
                    }
                };
                if was_negotiating {
                    register::try_register(ctx, client).await?;
                }
            }
            other => {
                send::send_numeric(
                    ctx,
                    client,
                    Numeric::ERR_INVALIDCAPCMD,
                    &[other, "Invalid CAP command"],
                );
            }
        }
        Ok(())
    }
}

fn hold_registration(client: &Client) {
    if let Some(state) = client.prereg.write().as_mut() {
        state.cap_negotiating = true;
    }
}

/// Bits of `remove` that are actually removable: sticky caps stay on.
fn removable_mask(ctx: &CoreContext, remove: u64) -> u64 {
    (0..64)
        .map(|i| 1u64 << i)
        .filter(|bit| remove & bit != 0 && !ctx.client_caps.index.is_sticky(*bit))
        .fold(0, |acc, bit| acc | bit)
}

fn reply(ctx: &CoreContext, client: &Client, sub: &str, args: &str) {
    let nick = client.nick.read().clone();
    let msg = MsgBuf::new("CAP")
        .with_source(&ctx.me.name)
        .with_param(nick)
        .with_param(sub)
        .with_param(args);
    send::deliver(client, &msg);
}

fn send_multiline(ctx: &CoreContext, client: &Client, sub: &str, words: &[String]) {
    let nick = client.nick.read().clone();
    let lines = paginate(words, CAP_LINE_LIMIT);
    let count = lines.len();
    for (i, line) in lines.into_iter().enumerate() {
        let mut msg = MsgBuf::new("CAP")
            .with_source(&ctx.me.name)
            .with_param(nick.clone())
            .with_param(sub);
        // continuation marker on every line but the last
        if i + 1 < count {
            msg.params.push("*".to_string());
        }
        msg.params.push(line);
        send::deliver(client, &msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::test_context;
    use crate::handlers::{Registry, SourceState};
    use crate::state::LocalLink;
    use tokio::sync::mpsc;

    fn fresh(ctx: &Arc<CoreContext>) -> (Arc<Client>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (link, _) = LocalLink::new(tx, 6667, false);
        let client = Arc::new(Client::local(
            ctx.uid_gen.next(),
            "127.0.0.1".parse().unwrap(),
            link,
            0,
        ));
        ctx.clients.insert(client.clone());
        (client, rx)
    }

    async fn run(ctx: &Arc<CoreContext>, client: &Arc<Client>, line: &str) {
        let registry = Registry::new();
        let msg = MsgBuf::parse(line).unwrap();
        let state = if client.is_registered() {
            SourceState::Client
        } else {
            SourceState::Unregistered
        };
        registry
            .dispatch(ctx, client, &msg, state, line.len())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ls_hides_pseudo_caps() {
        let ctx = test_context();
        let (client, mut rx) = fresh(&ctx);
        run(&ctx, &client, "CAP LS 302").await;
        let line = rx.try_recv().unwrap();
        assert!(line.contains("message-tags"));
        assert!(!line.contains("?oper"));
        // LS holds registration open
        assert!(client.prereg.read().as_ref().unwrap().cap_negotiating);
    }

    #[tokio::test]
    async fn test_req_ack_sets_bits_and_fires_cap_change() {
        let ctx = test_context();
        let (client, mut rx) = fresh(&ctx);
        run(&ctx, &client, "CAP REQ :message-tags server-time").await;
        let line = rx.try_recv().unwrap();
        assert!(line.contains("ACK"));
        assert_ne!(client.caps() & ctx.client_caps.message_tags, 0);
        assert_ne!(client.caps() & ctx.client_caps.server_time, 0);
    }

    #[tokio::test]
    async fn test_req_unknown_naks() {
        let ctx = test_context();
        let (client, mut rx) = fresh(&ctx);
        run(&ctx, &client, "CAP REQ :no-such-capability").await;
        assert!(rx.try_recv().unwrap().contains("NAK"));
        assert_eq!(client.caps(), 0);
    }

    #[tokio::test]
    async fn test_req_minus_removes() {
        let ctx = test_context();
        let (client, _rx) = fresh(&ctx);
        run(&ctx, &client, "CAP REQ :echo-message").await;
        run(&ctx, &client, "CAP REQ :-echo-message").await;
        assert_eq!(client.caps() & ctx.client_caps.echo_message, 0);
    }

    #[tokio::test]
    async fn test_end_releases_registration() {
        let ctx = test_context();
        let (client, _rx) = fresh(&ctx);
        run(&ctx, &client, "CAP LS").await;
        ctx.clients.claim_nick(&client, "alice");
        *client.username.write() = "~u".into();
        client.set_flag(crate::state::cflags::SENTUSER);
        assert!(!client.is_registered());
        run(&ctx, &client, "CAP END").await;
        assert!(client.is_registered());
    }
}

//! Per-chat login workers
//!
//! A phone-number login spans several Telegram updates (code, maybe a
//! password), and the platform client holding the login state cannot be
//! rebuilt between them. Each chat therefore gets a dedicated worker thread
//! running a single-threaded runtime that owns the client for the whole
//! exchange; handlers talk to it over a command channel. Exactly one worker
//! may exist per chat, and closing the registry entry is the only teardown
//! path.

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use crate::provision::client::{ClientFactory, CodeChannel, SessionConfig, SignInErrorKind};

/// A login stage that finished successfully, carrying the exported token
/// once the account is authorized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    CodeSent { channel: CodeChannel },
    Authorized { session_string: String },
}

pub type StageResult = Result<StageOutcome, SignInErrorKind>;

pub enum LoginCommand {
    SendCode {
        config: SessionConfig,
        phone: String,
        reply: oneshot::Sender<StageResult>,
    },
    SignIn {
        phone: String,
        code: String,
        reply: oneshot::Sender<StageResult>,
    },
    SignUp {
        phone: String,
        code: String,
        first_name: String,
        reply: oneshot::Sender<StageResult>,
    },
    CheckPassword {
        password: String,
        reply: oneshot::Sender<StageResult>,
    },
}

struct LoginHandle {
    tx: mpsc::Sender<LoginCommand>,
}

pub struct LoginRegistry {
    workers: DashMap<i64, LoginHandle>,
    factory: ClientFactory,
}

impl LoginRegistry {
    pub fn new(factory: ClientFactory) -> Self {
        Self {
            workers: DashMap::new(),
            factory,
        }
    }

    /// Whether a login exchange is in flight for this chat.
    pub fn contains(&self, chat_id: i64) -> bool {
        self.workers.contains_key(&chat_id)
    }

    /// Start a worker for this chat, replacing any stale one.
    pub fn begin(&self, chat_id: i64) {
        if self.workers.remove(&chat_id).is_some() {
            log::warn!("Replacing stale login worker for chat {}", chat_id);
        }

        let (tx, mut rx) = mpsc::channel::<LoginCommand>(8);
        let factory = self.factory.clone();

        std::thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    log::error!("Login worker runtime for chat {} failed to start: {}", chat_id, e);
                    return;
                }
            };

            runtime.block_on(async move {
                let mut client = factory();
                while let Some(command) = rx.recv().await {
                    match command {
                        LoginCommand::SendCode { config, phone, reply } => {
                            let result = async {
                                client
                                    .connect(&config)
                                    .await
                                    .map_err(|e| SignInErrorKind::Other(e.to_string()))?;
                                let channel = client.send_code(&phone).await?;
                                Ok(StageOutcome::CodeSent { channel })
                            }
                            .await;
                            let _ = reply.send(result);
                        }
                        LoginCommand::SignIn { phone, code, reply } => {
                            let result = async {
                                client.sign_in(&phone, &code).await?;
                                let token = client
                                    .export_session_string()
                                    .await
                                    .map_err(|e| SignInErrorKind::Other(e.to_string()))?;
                                Ok(StageOutcome::Authorized { session_string: token })
                            }
                            .await;
                            let _ = reply.send(result);
                        }
                        LoginCommand::SignUp {
                            phone,
                            code,
                            first_name,
                            reply,
                        } => {
                            let result = async {
                                client.sign_up(&phone, &code, &first_name).await?;
                                let token = client
                                    .export_session_string()
                                    .await
                                    .map_err(|e| SignInErrorKind::Other(e.to_string()))?;
                                Ok(StageOutcome::Authorized { session_string: token })
                            }
                            .await;
                            let _ = reply.send(result);
                        }
                        LoginCommand::CheckPassword { password, reply } => {
                            let result = async {
                                client.check_password(&password).await?;
                                let token = client
                                    .export_session_string()
                                    .await
                                    .map_err(|e| SignInErrorKind::Other(e.to_string()))?;
                                Ok(StageOutcome::Authorized { session_string: token })
                            }
                            .await;
                            let _ = reply.send(result);
                        }
                    }
                }
                client.disconnect().await;
                log::debug!("Login worker for chat {} stopped", chat_id);
            });
        });

        self.workers.insert(chat_id, LoginHandle { tx });
    }

    /// Send a command to this chat's worker and wait for the stage result.
    ///
    /// Returns None when no worker exists (the exchange expired or was never
    /// started); the caller resets the flow in that case.
    pub async fn execute(
        &self,
        chat_id: i64,
        build: impl FnOnce(oneshot::Sender<StageResult>) -> LoginCommand,
    ) -> Option<StageResult> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = build(reply_tx);
        // Clone the sender out of the map: holding a shard guard across the
        // send would block begin/close on the same shard while the channel
        // is full
        let tx = self.workers.get(&chat_id)?.tx.clone();
        if tx.send(command).await.is_err() {
            self.workers.remove(&chat_id);
            return None;
        }
        match reply_rx.await {
            Ok(result) => Some(result),
            Err(_) => {
                log::warn!("Login worker for chat {} dropped a reply", chat_id);
                self.workers.remove(&chat_id);
                None
            }
        }
    }

    /// Tear down this chat's worker. Dropping the channel ends its loop and
    /// disconnects the client.
    pub fn close(&self, chat_id: i64) {
        if self.workers.remove(&chat_id).is_some() {
            log::debug!("Closed login worker for chat {}", chat_id);
        }
    }
}

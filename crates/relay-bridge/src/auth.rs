//! Login progress of the single managed session.
//!
//! State lives behind a plain mutex that is never held across an await: each
//! transition reads what it needs, releases the lock, talks to the network,
//! then re-locks to commit. There is at most one outstanding challenge and the
//! latest `begin_login` wins; `confirm_code` needs no phone because it always
//! targets that single challenge (a supplied phone must match it).

use std::sync::Mutex;

use serde::Serialize;
use tracing::{info, warn};

use relay_core::current_unix_timestamp_ms;

use crate::client::{ClientError, CodeRequest, MessagingClient, PHONE_CODE_EXPIRED_RPC_CODE};
use crate::error::BridgeError;
use crate::lock_or_recover;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Unauthenticated,
    CodeRequested,
    TwoFactorRequired,
    Authenticated,
}

impl AuthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::CodeRequested => "code_requested",
            Self::TwoFactorRequired => "two_factor_required",
            Self::Authenticated => "authenticated",
        }
    }
}

/// One in-flight login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub phone: String,
    pub issued_unix_ms: u64,
    code_request: CodeRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub status: AuthStatus,
    pub pending_phone: Option<String>,
    pub challenge_issued_unix_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    CodeSent { phone: String },
    AlreadyAuthorized,
}

/// Successful completion; carries the credential to persist externally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCompletion {
    pub phone: String,
    pub session_token: String,
}

#[derive(Debug)]
struct AuthState {
    status: AuthStatus,
    challenge: Option<AuthChallenge>,
}

#[derive(Debug)]
pub struct AuthStateMachine {
    state: Mutex<AuthState>,
}

impl Default for AuthStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthStateMachine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AuthState {
                status: AuthStatus::Unauthenticated,
                challenge: None,
            }),
        }
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        let state = lock_or_recover(&self.state);
        AuthSnapshot {
            status: state.status,
            pending_phone: state.challenge.as_ref().map(|challenge| challenge.phone.clone()),
            challenge_issued_unix_ms: state
                .challenge
                .as_ref()
                .map(|challenge| challenge.issued_unix_ms),
        }
    }

    pub fn status(&self) -> AuthStatus {
        lock_or_recover(&self.state).status
    }

    pub async fn begin_login(
        &self,
        client: &dyn MessagingClient,
        phone: &str,
    ) -> Result<LoginOutcome, BridgeError> {
        let phone = phone.trim();
        if phone.is_empty() {
            return Err(BridgeError::validation("missing required parameter 'phone'"));
        }
        if self.status() == AuthStatus::Authenticated {
            return Ok(LoginOutcome::AlreadyAuthorized);
        }

        let authorized = client
            .is_authorized()
            .await
            .map_err(|error| BridgeError::network(error.to_string()))?;
        if authorized {
            self.mark_authenticated();
            return Ok(LoginOutcome::AlreadyAuthorized);
        }

        let code_request = client
            .send_code(phone)
            .await
            .map_err(|error| BridgeError::network(error.to_string()))?;

        let mut state = lock_or_recover(&self.state);
        if state.challenge.is_some() {
            info!("replacing outstanding login challenge");
        }
        state.challenge = Some(AuthChallenge {
            phone: phone.to_string(),
            issued_unix_ms: current_unix_timestamp_ms(),
            code_request,
        });
        state.status = AuthStatus::CodeRequested;
        info!(phone = phone, "login code requested");
        Ok(LoginOutcome::CodeSent {
            phone: phone.to_string(),
        })
    }

    pub async fn confirm_code(
        &self,
        client: &dyn MessagingClient,
        code: &str,
        phone: Option<&str>,
    ) -> Result<AuthCompletion, BridgeError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(BridgeError::validation("missing required parameter 'code'"));
        }
        let challenge = self.pending_challenge(phone)?;

        match client
            .sign_in(&challenge.phone, code, &challenge.code_request)
            .await
        {
            Ok(session_token) => Ok(self.complete(challenge.phone, session_token)),
            Err(ClientError::PasswordNeeded) => {
                let mut state = lock_or_recover(&self.state);
                if state.challenge.as_ref() == Some(&challenge) {
                    state.status = AuthStatus::TwoFactorRequired;
                }
                info!(phone = %challenge.phone, "second factor required");
                Err(BridgeError::TwoFactorRequired {
                    phone: challenge.phone,
                })
            }
            Err(error) => {
                let mut state = lock_or_recover(&self.state);
                if state.challenge.as_ref() == Some(&challenge) {
                    if error.rpc_code() == Some(PHONE_CODE_EXPIRED_RPC_CODE) {
                        state.challenge = None;
                        state.status = AuthStatus::Unauthenticated;
                    } else {
                        state.status = AuthStatus::CodeRequested;
                    }
                }
                warn!(error = %error, "login code rejected");
                Err(map_auth_failure(error))
            }
        }
    }

    pub async fn confirm_password(
        &self,
        client: &dyn MessagingClient,
        password: &str,
    ) -> Result<AuthCompletion, BridgeError> {
        if password.is_empty() {
            return Err(BridgeError::validation(
                "missing required parameter 'password'",
            ));
        }
        let phone = {
            let state = lock_or_recover(&self.state);
            match (&state.status, &state.challenge) {
                (AuthStatus::TwoFactorRequired, Some(challenge)) => challenge.phone.clone(),
                _ => {
                    return Err(BridgeError::NoPendingLogin(
                        "no login is waiting for a two-factor password".to_string(),
                    ))
                }
            }
        };

        match client.check_password(password).await {
            Ok(session_token) => Ok(self.complete(phone, session_token)),
            Err(error) => {
                warn!(error = %error, "two-factor password rejected");
                Err(map_auth_failure(error))
            }
        }
    }

    fn pending_challenge(&self, phone: Option<&str>) -> Result<AuthChallenge, BridgeError> {
        let state = lock_or_recover(&self.state);
        let Some(challenge) = state.challenge.as_ref() else {
            return Err(BridgeError::NoPendingLogin(
                "call /login before confirming a code".to_string(),
            ));
        };
        if let Some(phone) = phone.map(str::trim).filter(|phone| !phone.is_empty()) {
            if phone != challenge.phone {
                return Err(BridgeError::NoPendingLogin(format!(
                    "no login is pending for '{phone}'"
                )));
            }
        }
        Ok(challenge.clone())
    }

    fn complete(&self, phone: String, session_token: String) -> AuthCompletion {
        let mut state = lock_or_recover(&self.state);
        state.status = AuthStatus::Authenticated;
        state.challenge = None;
        info!(phone = %phone, "session authenticated");
        AuthCompletion {
            phone,
            session_token,
        }
    }

    fn mark_authenticated(&self) {
        let mut state = lock_or_recover(&self.state);
        state.status = AuthStatus::Authenticated;
        state.challenge = None;
    }
}

fn map_auth_failure(error: ClientError) -> BridgeError {
    if error.is_connection_loss() {
        BridgeError::network(error.to_string())
    } else {
        BridgeError::Auth(error.to_string())
    }
}

//! The confirmation capability consulted before risky actions.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

use crate::risk::RiskTier;

/// What the operator is being asked to approve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationRequest {
    /// Step or dangerous action name.
    pub action: String,
    /// Name plus target, for prompts.
    pub label: String,
    pub tier: RiskTier,
    /// Commands that will run if approved.
    pub commands: Vec<String>,
}

/// Decides whether a requires-confirmation or dangerous action may run.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, request: &ConfirmationRequest) -> bool;
}

/// Approves everything (`--yes`).
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

#[async_trait]
impl Confirmer for AssumeYes {
    async fn confirm(&self, _request: &ConfirmationRequest) -> bool {
        true
    }
}

/// Declines everything; used when no operator can answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysDecline;

#[async_trait]
impl Confirmer for AlwaysDecline {
    async fn confirm(&self, _request: &ConfirmationRequest) -> bool {
        false
    }
}

/// Approves everything except the named actions, and records each request.
#[derive(Debug, Default)]
pub struct ScriptedConfirmer {
    declined: HashSet<String>,
    asked: Mutex<Vec<ConfirmationRequest>>,
}

impl ScriptedConfirmer {
    pub fn approving() -> Self {
        Self::default()
    }

    pub fn declining(actions: &[&str]) -> Self {
        Self {
            declined: actions.iter().map(|a| a.to_string()).collect(),
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Requests seen so far, in order.
    pub fn asked(&self) -> Vec<ConfirmationRequest> {
        self.asked
            .lock()
            .map(|asked| asked.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Confirmer for ScriptedConfirmer {
    async fn confirm(&self, request: &ConfirmationRequest) -> bool {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(request.clone());
        }
        !self.declined.contains(&request.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(action: &str) -> ConfirmationRequest {
        ConfirmationRequest {
            action: action.to_string(),
            label: action.to_string(),
            tier: RiskTier::RequiresConfirmation,
            commands: vec!["apt-get clean".to_string()],
        }
    }

    #[tokio::test]
    async fn test_fixed_confirmers() {
        assert!(AssumeYes.confirm(&request("apt")).await);
        assert!(!AlwaysDecline.confirm(&request("apt")).await);
    }

    #[tokio::test]
    async fn test_scripted_confirmer_records() {
        let confirmer = ScriptedConfirmer::declining(&["snap-revisions"]);
        assert!(confirmer.confirm(&request("apt")).await);
        assert!(!confirmer.confirm(&request("snap-revisions")).await);
        let asked: Vec<_> = confirmer.asked().into_iter().map(|r| r.action).collect();
        assert_eq!(asked, vec!["apt", "snap-revisions"]);
    }
}

//! Transport-neutral join-request procedure.
//!
//! The transport reports who is asking and what it already knows about
//! them; this module turns that plus the group's options and whitelist
//! into an approve/decline/pending decision. Check failures fold into
//! the decision here so callers never have to guess a fallback.

use serde::{Deserialize, Serialize};

use crate::GroupId;
use crate::engine::WhitelistEngine;
use crate::options::{OptionSpec, OptionsError, OptionsStore};

pub const ENABLED_OPTION: &str = "enabled";
pub const DELETE_DECLINED_OPTION: &str = "delete_declined_requests";

/// Options the admission flow consults; embedding services include
/// these in their schema.
#[must_use]
pub fn admission_options() -> Vec<OptionSpec> {
    vec![
        OptionSpec::bool(ENABLED_OPTION, true, "process join requests for this group"),
        OptionSpec::bool(
            DELETE_DECLINED_OPTION,
            false,
            "decline rejected requests outright instead of leaving them pending",
        ),
    ]
}

/// What the transport already knows about the candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStanding {
    #[default]
    Unknown,
    Member,
    Banned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionAction {
    Approve,
    Decline,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionReason {
    Disabled,
    AlreadyMember,
    Banned,
    Whitelisted,
    NotWhitelisted,
    CheckFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionOutcome {
    pub action: AdmissionAction,
    pub reason: AdmissionReason,
}

impl AdmissionOutcome {
    fn new(action: AdmissionAction, reason: AdmissionReason) -> Self {
        Self { action, reason }
    }
}

/// Decides one join request. Whitelist-check errors are logged and
/// folded into the outcome; only option/storage reads can fail.
pub async fn handle_join_request(
    engine: &WhitelistEngine,
    options: &OptionsStore,
    group: GroupId,
    identity: &str,
    standing: CandidateStanding,
) -> Result<AdmissionOutcome, OptionsError> {
    let enabled = options
        .get(group, ENABLED_OPTION)
        .await?
        .as_bool()
        .unwrap_or(true);
    if !enabled {
        tracing::info!(
            target: "bouncer.admission",
            group,
            identity,
            "join requests disabled; leaving pending",
        );
        return Ok(AdmissionOutcome::new(
            AdmissionAction::Pending,
            AdmissionReason::Disabled,
        ));
    }

    if standing == CandidateStanding::Member {
        tracing::info!(target: "bouncer.admission", group, identity, "candidate is already a member");
        return Ok(AdmissionOutcome::new(
            AdmissionAction::Decline,
            AdmissionReason::AlreadyMember,
        ));
    }

    let delete_declined = options
        .get(group, DELETE_DECLINED_OPTION)
        .await?
        .as_bool()
        .unwrap_or(false);
    let declined_action = if delete_declined {
        AdmissionAction::Decline
    } else {
        AdmissionAction::Pending
    };

    if standing == CandidateStanding::Banned {
        tracing::info!(target: "bouncer.admission", group, identity, "candidate is banned");
        return Ok(AdmissionOutcome::new(
            declined_action,
            AdmissionReason::Banned,
        ));
    }

    match engine.check_allowed(group, identity).await {
        Ok(true) => {
            tracing::info!(target: "bouncer.admission", group, identity, "candidate whitelisted; approving");
            Ok(AdmissionOutcome::new(
                AdmissionAction::Approve,
                AdmissionReason::Whitelisted,
            ))
        }
        Ok(false) => {
            tracing::info!(target: "bouncer.admission", group, identity, "candidate not whitelisted");
            Ok(AdmissionOutcome::new(
                declined_action,
                AdmissionReason::NotWhitelisted,
            ))
        }
        Err(error) => {
            tracing::warn!(
                target: "bouncer.admission",
                group,
                identity,
                error = %error,
                "whitelist check failed",
            );
            Ok(AdmissionOutcome::new(
                declined_action,
                AdmissionReason::CheckFailed,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Result;

    use super::{
        AdmissionAction, AdmissionReason, CandidateStanding, admission_options,
        handle_join_request,
    };
    use crate::engine::WhitelistEngine;
    use crate::fetch::default_fetcher;
    use crate::kv;
    use crate::options::OptionsStore;
    use crate::table::StaticTables;

    async fn fixture() -> Result<(WhitelistEngine, OptionsStore)> {
        let store = kv::memory();
        let tables = StaticTables::default();
        tables
            .insert(
                "sheet://members",
                vec![vec![vec!["alice".to_string()], vec!["bob".to_string()]]],
            )
            .await;
        let engine = WhitelistEngine::new(store.clone(), default_fetcher(Duration::from_secs(5)))
            .with_tables(Arc::new(tables));
        engine
            .set_whitelist(
                1,
                &["table".to_string(), "location=sheet://members".to_string()],
            )
            .await?;
        Ok((engine, OptionsStore::new(store, admission_options())))
    }

    #[tokio::test]
    async fn whitelisted_candidates_are_approved() -> Result<()> {
        let (engine, options) = fixture().await?;
        let outcome =
            handle_join_request(&engine, &options, 1, "@Alice", CandidateStanding::Unknown).await?;
        assert_eq!(outcome.action, AdmissionAction::Approve);
        assert_eq!(outcome.reason, AdmissionReason::Whitelisted);
        Ok(())
    }

    #[tokio::test]
    async fn unlisted_candidates_stay_pending_by_default() -> Result<()> {
        let (engine, options) = fixture().await?;
        let outcome =
            handle_join_request(&engine, &options, 1, "mallory", CandidateStanding::Unknown)
                .await?;
        assert_eq!(outcome.action, AdmissionAction::Pending);
        assert_eq!(outcome.reason, AdmissionReason::NotWhitelisted);
        Ok(())
    }

    #[tokio::test]
    async fn delete_declined_turns_pending_into_decline() -> Result<()> {
        let (engine, options) = fixture().await?;
        options.set(1, "delete_declined_requests", "yes").await?;
        let outcome =
            handle_join_request(&engine, &options, 1, "mallory", CandidateStanding::Unknown)
                .await?;
        assert_eq!(outcome.action, AdmissionAction::Decline);
        assert_eq!(outcome.reason, AdmissionReason::NotWhitelisted);
        Ok(())
    }

    #[tokio::test]
    async fn disabled_groups_take_no_action() -> Result<()> {
        let (engine, options) = fixture().await?;
        options.set(1, "enabled", "false").await?;
        let outcome =
            handle_join_request(&engine, &options, 1, "alice", CandidateStanding::Unknown).await?;
        assert_eq!(outcome.action, AdmissionAction::Pending);
        assert_eq!(outcome.reason, AdmissionReason::Disabled);
        Ok(())
    }

    #[tokio::test]
    async fn members_are_declined_outright() -> Result<()> {
        let (engine, options) = fixture().await?;
        let outcome =
            handle_join_request(&engine, &options, 1, "alice", CandidateStanding::Member).await?;
        assert_eq!(outcome.action, AdmissionAction::Decline);
        assert_eq!(outcome.reason, AdmissionReason::AlreadyMember);
        Ok(())
    }

    #[tokio::test]
    async fn banned_candidates_follow_the_delete_option() -> Result<()> {
        let (engine, options) = fixture().await?;
        let pending =
            handle_join_request(&engine, &options, 1, "alice", CandidateStanding::Banned).await?;
        assert_eq!(pending.action, AdmissionAction::Pending);
        assert_eq!(pending.reason, AdmissionReason::Banned);

        options.set(1, "delete_declined_requests", "on").await?;
        let declined =
            handle_join_request(&engine, &options, 1, "alice", CandidateStanding::Banned).await?;
        assert_eq!(declined.action, AdmissionAction::Decline);
        assert_eq!(declined.reason, AdmissionReason::Banned);
        Ok(())
    }

    #[tokio::test]
    async fn check_failures_fold_into_the_decision() -> Result<()> {
        let store = kv::memory();
        let engine = WhitelistEngine::new(store.clone(), default_fetcher(Duration::from_secs(5)));
        let options = OptionsStore::new(store, admission_options());

        // group 99 has no whitelist row at all
        let outcome =
            handle_join_request(&engine, &options, 99, "alice", CandidateStanding::Unknown)
                .await?;
        assert_eq!(outcome.action, AdmissionAction::Pending);
        assert_eq!(outcome.reason, AdmissionReason::CheckFailed);

        options.set(99, "delete_declined_requests", "true").await?;
        let declined =
            handle_join_request(&engine, &options, 99, "alice", CandidateStanding::Unknown)
                .await?;
        assert_eq!(declined.action, AdmissionAction::Decline);
        assert_eq!(declined.reason, AdmissionReason::CheckFailed);
        Ok(())
    }
}

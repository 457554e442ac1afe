use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use usergraph_core::{DirectoryUser, UserDirectory};
use usergraph_sql::{SQLError, SQLExec, SQLStore};

use crate::error::FollowingError;
use crate::model::{
    FollowRequest, FollowRequestFields, FollowRequestView, Follower, Notification, OutboxStats,
    Outcome, RequestStatus, RequestUpdate, SideEffect, SideEffectKind,
};
use crate::outbox::OutboxStore;
use crate::store::{FollowRequestStore, FollowerStore};

const REQUESTED_SUFFIX: &str = "requested to follow you.";
const STARTED_SUFFIX: &str = "started following you.";

/// What to do about the notification for one operation, decided before the
/// primary write.
enum NotificationPlan {
    Queue(Notification),
    Skip(SideEffect),
}

// ---------------------------------------------------------------------------
// FollowingEngine: request state machine + follower graph
// ---------------------------------------------------------------------------

/// The following engine.
///
/// Owns the request lifecycle and the follower graph. Every mutation runs
/// in one SQL transaction together with its follower edge and its outbox
/// row; delivery happens later on the dispatcher.
pub struct FollowingEngine {
    db: Arc<dyn SQLStore>,
    requests: FollowRequestStore,
    followers: FollowerStore,
    outbox: OutboxStore,
    directory: Arc<dyn UserDirectory>,
    /// Raised after a committed enqueue to wake the dispatcher.
    notify: Arc<Notify>,
}

impl FollowingEngine {
    pub fn new(
        db: Arc<dyn SQLStore>,
        directory: Arc<dyn UserDirectory>,
    ) -> Result<Self, FollowingError> {
        Ok(Self {
            requests: FollowRequestStore::new(db.clone())?,
            followers: FollowerStore::new(db.clone())?,
            outbox: OutboxStore::new(db.clone())?,
            db,
            directory,
            notify: Arc::new(Notify::new()),
        })
    }

    pub fn outbox(&self) -> &OutboxStore {
        &self.outbox
    }

    /// The dispatcher's wake-up handle.
    pub fn notify(&self) -> &Arc<Notify> {
        &self.notify
    }

    // =======================================================================
    // Requests
    // =======================================================================

    /// Open a PENDING request from `follower_id` to `following_id` and queue
    /// a follow notification for the target.
    pub fn create_request(
        &self,
        follower_id: i64,
        following_id: i64,
    ) -> Result<Outcome<i64>, FollowingError> {
        validate_pair(follower_id, following_id)?;
        let plan = self.plan_follow_notification(follower_id, following_id, REQUESTED_SUFFIX)?;

        let fields = FollowRequestFields::pending(follower_id, following_id);
        let queued = matches!(plan, NotificationPlan::Queue(_));
        let id = self.in_transaction(|tx| {
            let id = FollowRequestStore::add_in(tx, &fields).map_err(|e| match e {
                FollowingError::Conflict(m) => FollowingError::Conflict(m),
                other => FollowingError::RequestCreation(other.to_string()),
            })?;
            if let NotificationPlan::Queue(notification) = &plan {
                OutboxStore::enqueue(tx, notification)
                    .map_err(|e| FollowingError::RequestCreation(e.to_string()))?;
            }
            Ok(id)
        })?;

        info!(id, follower_id, following_id, "follow request created");
        if queued {
            self.notify.notify_one();
        }
        Ok(Outcome::new(id).with(notification_effect(plan)))
    }

    /// Resolve a PENDING request. ACCEPTED also creates the follower edge in
    /// the same transaction.
    pub fn update_request(
        &self,
        id: i64,
        update: RequestUpdate,
    ) -> Result<Outcome<FollowRequestView>, FollowingError> {
        let target = update
            .status
            .ok_or_else(|| FollowingError::Validation("status is required".into()))?;
        if !target.is_terminal() {
            return Err(FollowingError::Validation(format!(
                "status must be ACCEPTED or REJECTED, got {target}"
            )));
        }

        let (updated, edge) = self.in_transaction(|tx| {
            let current = match FollowRequestStore::get_in(tx, id) {
                Ok(r) => r,
                Err(FollowingError::NotFound(message)) => {
                    return Err(FollowingError::RequestUpdate {
                        message,
                        prior: None,
                    });
                }
                Err(e) => return Err(e),
            };
            check_payload_pair(&current, &update)?;
            if !current.status.can_transition_to(target) {
                return Err(FollowingError::InvalidTransition {
                    id,
                    from: current.status,
                    to: target,
                });
            }

            let fields = FollowRequestFields {
                follower_id: current.follower_id,
                following_id: current.following_id,
                status: target,
            };
            let updated =
                FollowRequestStore::update_in(tx, id, &fields, Some(RequestStatus::Pending))
                    .map_err(|e| match e {
                        e @ FollowingError::InvalidTransition { .. } => e,
                        other => FollowingError::RequestUpdate {
                            message: other.to_string(),
                            prior: Some(FollowRequestView::from(&current)),
                        },
                    })?;

            let edge = if target == RequestStatus::Accepted {
                let added = FollowerStore::add_follower_in(
                    tx,
                    current.follower_id,
                    current.following_id,
                )
                .map_err(|e| FollowingError::FollowerCreation(e.to_string()))?;
                Some(added)
            } else {
                None
            };
            Ok((updated, edge))
        })?;

        info!(id, status = %updated.status, "follow request resolved");
        let mut outcome = Outcome::new(FollowRequestView::from(&updated));
        if let Some(edge) = edge {
            outcome = outcome.with(if edge.created {
                SideEffect::applied(SideEffectKind::FollowerEdge)
            } else {
                SideEffect::skipped(
                    SideEffectKind::FollowerEdge,
                    format!("edge {} already existed", edge.id),
                )
            });
        }
        Ok(outcome)
    }

    /// Withdraw a PENDING request.
    pub fn cancel_request(&self, id: i64) -> Result<(), FollowingError> {
        self.in_transaction(|tx| {
            let current = FollowRequestStore::get_in(tx, id)?;
            if current.status != RequestStatus::Pending {
                return Err(FollowingError::NotCancellable {
                    id,
                    status: current.status,
                });
            }
            FollowRequestStore::delete_in(tx, id)
        })?;
        info!(id, "follow request cancelled");
        Ok(())
    }

    pub fn get_request(&self, id: i64) -> Result<FollowRequest, FollowingError> {
        self.requests.get_request(id)
    }

    pub fn get_requests(&self) -> Result<Vec<FollowRequest>, FollowingError> {
        self.requests.get_requests()
    }

    pub fn get_requests_by_following_id(
        &self,
        following_id: i64,
    ) -> Result<Vec<FollowRequest>, FollowingError> {
        self.requests.get_requests_by_following_id(following_id)
    }

    // =======================================================================
    // Follower graph
    // =======================================================================

    /// Follow directly, without a request. Repeating the call for an
    /// existing edge returns the same id and queues nothing.
    pub fn create_follower(
        &self,
        follower_id: i64,
        following_id: i64,
    ) -> Result<Outcome<i64>, FollowingError> {
        validate_pair(follower_id, following_id)?;
        let plan = self.plan_follow_notification(follower_id, following_id, STARTED_SUFFIX)?;

        let (edge, queued) = self.in_transaction(|tx| {
            let edge = FollowerStore::add_follower_in(tx, follower_id, following_id)
                .map_err(|e| FollowingError::FollowerCreation(e.to_string()))?;
            let mut queued = false;
            if edge.created {
                if let NotificationPlan::Queue(notification) = &plan {
                    OutboxStore::enqueue(tx, notification)
                        .map_err(|e| FollowingError::FollowerCreation(e.to_string()))?;
                    queued = true;
                }
            }
            Ok((edge, queued))
        })?;

        if queued {
            self.notify.notify_one();
        }
        let effect = if edge.created {
            info!(id = edge.id, follower_id, following_id, "follower created");
            notification_effect(plan)
        } else {
            debug!(id = edge.id, follower_id, following_id, "already following");
            SideEffect::skipped(SideEffectKind::Notification, "already following")
        };
        Ok(Outcome::new(edge.id).with(effect))
    }

    /// Unfollow. Removing a missing edge is not an error.
    pub fn remove_following(
        &self,
        follower_id: i64,
        following_id: i64,
    ) -> Result<Outcome<u64>, FollowingError> {
        let removed = self
            .followers
            .remove_following(follower_id, following_id)
            .map_err(|e| FollowingError::Persistence(e.to_string()))?;
        info!(follower_id, following_id, removed, "following removed");
        Ok(Outcome::new(removed))
    }

    pub fn get_followers(&self, user_id: i64) -> Result<Vec<Follower>, FollowingError> {
        self.followers.get_followers(user_id)
    }

    pub fn get_following(&self, user_id: i64) -> Result<Vec<Follower>, FollowingError> {
        self.followers.get_following(user_id)
    }

    pub fn is_following(&self, follower_id: i64, following_id: i64) -> Result<bool, FollowingError> {
        self.followers.exists(follower_id, following_id)
    }

    // =======================================================================
    // Outbox
    // =======================================================================

    pub fn outbox_stats(&self) -> Result<OutboxStats, FollowingError> {
        self.outbox.stats()
    }

    pub fn purge_delivered(&self) -> Result<u64, FollowingError> {
        let removed = self.outbox.purge_delivered()?;
        info!(removed, "purged delivered notifications");
        Ok(removed)
    }

    // =======================================================================
    // Internal helpers
    // =======================================================================

    /// Best-effort user lookup. Directory faults are logged and reported to
    /// the caller as a reason string.
    fn lookup(&self, id: i64) -> Result<Option<DirectoryUser>, String> {
        self.directory.get_by_id(id).map_err(|e| {
            warn!(user_id = id, "user directory lookup failed: {e}");
            e.to_string()
        })
    }

    /// Enforce the block rule and decide the notification. Runs before the
    /// write so a blocked requester never reaches the store.
    fn plan_follow_notification(
        &self,
        follower_id: i64,
        following_id: i64,
        suffix: &str,
    ) -> Result<NotificationPlan, FollowingError> {
        let target = match self.lookup(following_id) {
            Ok(Some(target)) => target,
            Ok(None) => {
                return Ok(NotificationPlan::Skip(SideEffect::skipped(
                    SideEffectKind::Notification,
                    format!("user {following_id} not found"),
                )));
            }
            Err(reason) => {
                return Ok(NotificationPlan::Skip(SideEffect::failed(
                    SideEffectKind::Notification,
                    format!("lookup of user {following_id} failed: {reason}"),
                )));
            }
        };

        if target.has_blocked(follower_id) {
            return Err(FollowingError::Blocked {
                requester: follower_id,
                target: following_id,
            });
        }
        if !target.follow_notifications {
            return Ok(NotificationPlan::Skip(SideEffect::skipped(
                SideEffectKind::Notification,
                format!("user {following_id} turned off follow notifications"),
            )));
        }
        if target.identity_provider_id.is_empty() {
            return Ok(NotificationPlan::Skip(SideEffect::skipped(
                SideEffectKind::Notification,
                format!("user {following_id} has no identity-provider id"),
            )));
        }

        let name = match self.lookup(follower_id) {
            Ok(Some(follower)) => follower.username,
            _ => format!("user #{follower_id}"),
        };
        Ok(NotificationPlan::Queue(Notification::follow(
            format!("{name} {suffix}"),
            target.identity_provider_id,
        )))
    }

    /// Run `body` in one SQL transaction and hand back its value or its
    /// own error. Commit failures surface as `Persistence`.
    fn in_transaction<T>(
        &self,
        mut body: impl FnMut(&dyn SQLExec) -> Result<T, FollowingError>,
    ) -> Result<T, FollowingError> {
        let mut result: Option<Result<T, FollowingError>> = None;
        let committed = self.db.transaction(&mut |tx| match body(tx) {
            Ok(value) => {
                result = Some(Ok(value));
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                result = Some(Err(e));
                Err(SQLError::Aborted(reason))
            }
        });

        match (committed, result) {
            (Ok(()), Some(Ok(value))) => Ok(value),
            (_, Some(Err(e))) => Err(e),
            (Err(e), _) => Err(FollowingError::Persistence(e.to_string())),
            (Ok(()), None) => Err(FollowingError::Persistence(
                "transaction finished without running".into(),
            )),
        }
    }
}

fn validate_pair(follower_id: i64, following_id: i64) -> Result<(), FollowingError> {
    if follower_id <= 0 || following_id <= 0 {
        return Err(FollowingError::Validation(
            "followerId and followingId must be positive".into(),
        ));
    }
    if follower_id == following_id {
        return Err(FollowingError::Validation(format!(
            "user {follower_id} cannot follow themselves"
        )));
    }
    Ok(())
}

/// Non-zero ids in the payload must name the stored pair.
fn check_payload_pair(current: &FollowRequest, update: &RequestUpdate) -> Result<(), FollowingError> {
    let mismatch = |given: Option<i64>, stored: i64| matches!(given, Some(v) if v != 0 && v != stored);
    if mismatch(update.follower_id, current.follower_id)
        || mismatch(update.following_id, current.following_id)
    {
        return Err(FollowingError::Validation(format!(
            "payload does not match follow request {} ({} -> {})",
            current.id, current.follower_id, current.following_id
        )));
    }
    Ok(())
}

fn notification_effect(plan: NotificationPlan) -> SideEffect {
    match plan {
        NotificationPlan::Queue(_) => SideEffect::applied(SideEffectKind::Notification),
        NotificationPlan::Skip(effect) => effect,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EffectStatus, OutboxStatus};
    use usergraph_core::StaticDirectory;
    use usergraph_sql::SqliteStore;

    fn user(id: i64, name: &str) -> DirectoryUser {
        DirectoryUser {
            id,
            username: name.into(),
            identity_provider_id: format!("auth0|{id}"),
            blocked: vec![],
            follow_notifications: true,
        }
    }

    fn engine_with(users: Vec<DirectoryUser>) -> FollowingEngine {
        let db: Arc<dyn SQLStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let directory = StaticDirectory::new();
        for u in users {
            directory.insert(u);
        }
        FollowingEngine::new(db, Arc::new(directory)).unwrap()
    }

    fn engine() -> FollowingEngine {
        engine_with(vec![user(1, "alice"), user(2, "bob"), user(3, "carol")])
    }

    #[test]
    fn create_request_queues_notification() {
        let engine = engine();
        let outcome = engine.create_request(1, 2).unwrap();
        assert_eq!(
            outcome.effect(SideEffectKind::Notification).unwrap().status,
            EffectStatus::Applied
        );

        let pending = engine.outbox().pending(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].notification.message, "alice requested to follow you.");
        assert_eq!(pending[0].notification.identity_provider_id, "auth0|2");
        assert_eq!(pending[0].status, OutboxStatus::Pending);
    }

    #[test]
    fn self_follow_rejected() {
        let engine = engine();
        assert!(matches!(
            engine.create_request(1, 1),
            Err(FollowingError::Validation(_))
        ));
        assert!(matches!(
            engine.create_follower(2, 2),
            Err(FollowingError::Validation(_))
        ));
    }

    #[test]
    fn duplicate_pending_request_conflicts() {
        let engine = engine();
        engine.create_request(1, 2).unwrap();
        assert!(matches!(
            engine.create_request(1, 2),
            Err(FollowingError::Conflict(_))
        ));
        // The rolled back attempt queued nothing.
        assert_eq!(engine.outbox_stats().unwrap().pending, 1);
    }

    #[test]
    fn accept_creates_edge_once() {
        let engine = engine();
        let id = engine.create_request(1, 2).unwrap().primary;

        let outcome = engine
            .update_request(id, RequestUpdate::status(RequestStatus::Accepted))
            .unwrap();
        assert_eq!(outcome.primary.status, RequestStatus::Accepted);
        assert_eq!(
            outcome.effect(SideEffectKind::FollowerEdge).unwrap().status,
            EffectStatus::Applied
        );

        let again = engine.update_request(id, RequestUpdate::status(RequestStatus::Accepted));
        assert!(matches!(
            again,
            Err(FollowingError::InvalidTransition {
                from: RequestStatus::Accepted,
                to: RequestStatus::Accepted,
                ..
            })
        ));
        assert_eq!(engine.get_followers(2).unwrap().len(), 1);
    }

    #[test]
    fn reject_creates_no_edge() {
        let engine = engine();
        let id = engine.create_request(1, 2).unwrap().primary;
        let outcome = engine
            .update_request(id, RequestUpdate::status(RequestStatus::Rejected))
            .unwrap();
        assert_eq!(outcome.primary.status, RequestStatus::Rejected);
        assert!(outcome.side_effects.is_empty());
        assert!(engine.get_following(1).unwrap().is_empty());

        let flip = engine.update_request(id, RequestUpdate::status(RequestStatus::Accepted));
        assert!(matches!(flip, Err(FollowingError::InvalidTransition { .. })));
        assert!(engine.get_following(1).unwrap().is_empty());
    }

    #[test]
    fn update_validates_status_and_payload() {
        let engine = engine();
        let id = engine.create_request(1, 2).unwrap().primary;

        assert!(matches!(
            engine.update_request(id, RequestUpdate::status(RequestStatus::Pending)),
            Err(FollowingError::Validation(_))
        ));
        assert!(matches!(
            engine.update_request(id, RequestUpdate::default()),
            Err(FollowingError::Validation(_))
        ));

        let wrong_pair = RequestUpdate {
            follower_id: Some(3),
            following_id: Some(2),
            status: Some(RequestStatus::Accepted),
        };
        assert!(matches!(
            engine.update_request(id, wrong_pair),
            Err(FollowingError::Validation(_))
        ));

        // Zero ids are treated as absent.
        let zeros = RequestUpdate {
            follower_id: Some(0),
            following_id: Some(0),
            status: Some(RequestStatus::Accepted),
        };
        engine.update_request(id, zeros).unwrap();
        assert!(engine.is_following(1, 2).unwrap());
    }

    #[test]
    fn update_missing_request() {
        let engine = engine();
        let err = engine
            .update_request(404, RequestUpdate::status(RequestStatus::Accepted))
            .unwrap_err();
        assert!(matches!(err, FollowingError::RequestUpdate { prior: None, .. }));
    }

    #[test]
    fn accept_when_already_following_skips_edge() {
        let engine = engine();
        let edge = engine.create_follower(1, 2).unwrap().primary;
        let id = engine.create_request(1, 2).unwrap().primary;
        let outcome = engine
            .update_request(id, RequestUpdate::status(RequestStatus::Accepted))
            .unwrap();
        assert!(matches!(
            outcome.effect(SideEffectKind::FollowerEdge).unwrap().status,
            EffectStatus::Skipped(_)
        ));
        let followers = engine.get_followers(2).unwrap();
        assert_eq!(followers.len(), 1);
        assert_eq!(followers[0].id, edge);
    }

    #[test]
    fn blocked_requester_is_refused() {
        let mut target = user(2, "bob");
        target.blocked = vec![1];
        let engine = engine_with(vec![user(1, "alice"), target]);

        assert!(matches!(
            engine.create_request(1, 2),
            Err(FollowingError::Blocked {
                requester: 1,
                target: 2
            })
        ));
        assert!(matches!(
            engine.create_follower(1, 2),
            Err(FollowingError::Blocked { .. })
        ));
        assert!(engine.get_requests().unwrap().is_empty());
        assert!(engine.get_followers(2).unwrap().is_empty());
    }

    #[test]
    fn unknown_users() {
        let engine = engine_with(vec![user(2, "bob")]);

        // Unknown requester: notification still goes out with a placeholder name.
        engine.create_request(77, 2).unwrap();
        let pending = engine.outbox().pending(10).unwrap();
        assert_eq!(pending[0].notification.message, "user #77 requested to follow you.");

        // Unknown target: request persists, notification skipped.
        let outcome = engine.create_request(2, 88).unwrap();
        assert!(matches!(
            outcome.effect(SideEffectKind::Notification).unwrap().status,
            EffectStatus::Skipped(_)
        ));
        assert_eq!(engine.get_requests_by_following_id(88).unwrap().len(), 1);
        assert_eq!(engine.outbox_stats().unwrap().pending, 1);
    }

    #[test]
    fn muted_target_gets_no_notification() {
        let mut target = user(2, "bob");
        target.follow_notifications = false;
        let engine = engine_with(vec![user(1, "alice"), target]);

        let outcome = engine.create_follower(1, 2).unwrap();
        assert!(matches!(
            outcome.effect(SideEffectKind::Notification).unwrap().status,
            EffectStatus::Skipped(_)
        ));
        assert_eq!(engine.outbox_stats().unwrap().pending, 0);
        assert!(engine.is_following(1, 2).unwrap());
    }

    #[test]
    fn direct_follow_twice() {
        let engine = engine();
        let first = engine.create_follower(1, 3).unwrap();
        let second = engine.create_follower(1, 3).unwrap();
        assert_eq!(first.primary, second.primary);
        assert_eq!(
            second.effect(SideEffectKind::Notification).unwrap().status,
            EffectStatus::Skipped("already following".into())
        );

        let pending = engine.outbox().pending(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].notification.message, "alice started following you.");
    }

    #[test]
    fn cancel_only_pending() {
        let engine = engine();
        let open = engine.create_request(1, 2).unwrap().primary;
        engine.cancel_request(open).unwrap();
        assert!(matches!(
            engine.get_request(open),
            Err(FollowingError::NotFound(_))
        ));

        let done = engine.create_request(1, 2).unwrap().primary;
        engine
            .update_request(done, RequestUpdate::status(RequestStatus::Rejected))
            .unwrap();
        assert!(matches!(
            engine.cancel_request(done),
            Err(FollowingError::NotCancellable { .. })
        ));
        assert!(matches!(
            engine.cancel_request(9999),
            Err(FollowingError::NotFound(_))
        ));
    }

    #[test]
    fn remove_following_is_idempotent() {
        let engine = engine();
        engine.create_follower(1, 2).unwrap();
        assert_eq!(engine.remove_following(1, 2).unwrap().primary, 1);
        assert_eq!(engine.remove_following(1, 2).unwrap().primary, 0);
        assert!(!engine.is_following(1, 2).unwrap());
    }
}

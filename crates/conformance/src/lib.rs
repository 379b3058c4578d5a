#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex, MutexGuard};
    use std::time::Duration;

    use tokio::time::Instant;
    use tracing::debug;
    use xmpp_parsers::iq::Iq;
    use xmpp_parsers::presence::Type as PresenceType;
    use xmpp_parsers::ns;
    use xmpp_parsers::roster::{Roster, Subscription};

    use skua_client::ClientSession;
    use skua_core::{
        HandlerError, HarnessConfig, RouteKey, Stanza, StanzaHandler, StanzaKind,
    };
    use skua_harness::{CountedWatch, HarnessError, StanzaWatch, send_and_await_push};
    use skua_test_support::fixtures;
    use skua_test_support::{BOB, CAROL, ScriptedReply, ScriptedSession};

    /// The client stack's own roster handler: the delegate every
    /// interception chain must keep feeding. Keeps the contact list the
    /// way the stack would, so tests can check that observing a push
    /// never starved the cache.
    struct RosterCache {
        entries: Mutex<HashMap<String, Subscription>>,
    }

    impl RosterCache {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                entries: Mutex::new(HashMap::new()),
            })
        }

        fn contains(&self, jid: &str) -> bool {
            self.lock_entries().contains_key(jid)
        }

        fn len(&self) -> usize {
            self.lock_entries().len()
        }

        fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, Subscription>> {
            self.entries
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
        }
    }

    impl StanzaHandler for RosterCache {
        fn handle(&self, stanza: &Stanza) -> Result<(), HandlerError> {
            let Stanza::Iq(iq) = stanza else {
                return Ok(());
            };
            let Iq::Set { payload, .. } = iq.as_ref() else {
                return Ok(());
            };
            if !payload.is("query", ns::ROSTER) {
                return Ok(());
            }

            let roster = Roster::try_from(payload.clone())
                .map_err(|error| HandlerError::failed(stanza, format!("bad roster push: {error}")))?;

            let mut entries = self.lock_entries();
            for item in roster.items {
                let jid = item.jid.to_string();
                if matches!(item.subscription, Subscription::Remove) {
                    debug!(%jid, "contact removed");
                    entries.remove(&jid);
                } else {
                    debug!(%jid, "contact updated");
                    entries.insert(jid, item.subscription);
                }
            }
            Ok(())
        }
    }

    fn roster_key() -> RouteKey {
        RouteKey::scoped(StanzaKind::Iq, ns::ROSTER)
    }

    fn session_with_cache() -> (ScriptedSession, Arc<RosterCache>) {
        let session = ScriptedSession::new();
        let cache = RosterCache::new();
        let handler: Arc<dyn StanzaHandler> = cache.clone();
        session.registry().register(roster_key(), handler);
        (session, cache)
    }

    fn push_concerns(jid: &'static str) -> impl Fn(&Stanza) -> bool + Send + Sync + 'static {
        move |stanza: &Stanza| {
            let Stanza::Iq(iq) = stanza else {
                return false;
            };
            let Iq::Set { payload, .. } = iq.as_ref() else {
                return false;
            };
            let Ok(roster) = Roster::try_from(payload.clone()) else {
                return false;
            };
            roster.items.iter().any(|item| item.jid.to_string() == jid)
        }
    }

    // ── Roster management (adding a contact) ─────────────────────────

    #[tokio::test(flavor = "current_thread")]
    async fn roster_set_is_answered_and_the_push_names_the_new_contact() {
        let (session, cache) = session_with_cache();
        session.script(ScriptedReply::result_with_pushes(vec![
            fixtures::roster_push("srv-1", CAROL.jid, "none"),
        ]));

        let exchange = send_and_await_push(
            &session,
            roster_key(),
            "roster push for carol@example.com",
            fixtures::roster_set_request(CAROL.jid),
            push_concerns(CAROL.jid),
            HarnessConfig::default().await_timeout(),
        )
        .await
        .expect("roster set should be answered and pushed");

        assert!(matches!(exchange.reply, Iq::Result { .. }));
        assert!(push_concerns(CAROL.jid)(&exchange.push));
        assert!(
            cache.contains(CAROL.jid),
            "the stack's roster cache must have processed the push before the test saw it"
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rejected_roster_set_reports_the_request_leg_and_leaves_no_chain() {
        let (session, cache) = session_with_cache();
        session.script(ScriptedReply::error("not-allowed"));

        let error = send_and_await_push(
            &session,
            roster_key(),
            "roster push for carol@example.com",
            fixtures::roster_set_request(CAROL.jid),
            push_concerns(CAROL.jid),
            HarnessConfig::default().await_timeout(),
        )
        .await
        .expect_err("rejected set must fail on the request leg");

        assert!(matches!(error, HarnessError::RequestFailed { .. }));
        assert!(!cache.contains(CAROL.jid));

        let cache_handler: Arc<dyn StanzaHandler> = cache.clone();
        let current = session
            .registry()
            .handler_for(&roster_key())
            .expect("the cache must be the registered handler again");
        assert!(Arc::ptr_eq(&current, &cache_handler));
    }

    // ── Roster pushes (server-initiated) ─────────────────────────────

    #[tokio::test(flavor = "current_thread")]
    async fn observed_push_still_reaches_the_roster_cache() {
        let (session, cache) = session_with_cache();

        let watch = StanzaWatch::matching(
            session.registry(),
            roster_key(),
            "roster push for carol@example.com",
            push_concerns(CAROL.jid),
        )
        .expect("watch should install");

        session.deliver(fixtures::roster_push("srv-1", CAROL.jid, "both"));

        let push = watch
            .wait(HarnessConfig::default().await_timeout())
            .await
            .expect("the push should be observed");
        assert!(push_concerns(CAROL.jid)(&push));
        assert!(cache.contains(CAROL.jid));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn push_for_a_different_contact_does_not_satisfy_the_await() {
        let (session, cache) = session_with_cache();

        let watch = StanzaWatch::matching(
            session.registry(),
            roster_key(),
            "roster push for carol@example.com",
            push_concerns(CAROL.jid),
        )
        .expect("watch should install");

        session.deliver(fixtures::roster_push("srv-1", BOB.jid, "from"));

        let error = watch
            .wait(Duration::from_secs(2))
            .await
            .expect_err("an unrelated push must not resolve the await");
        assert!(matches!(error, HarnessError::Timeout { .. }));
        assert!(cache.contains(BOB.jid), "the unrelated push still reaches the cache");
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn a_push_the_server_never_sends_is_provable_by_timeout() {
        let (session, _cache) = session_with_cache();

        let watch = StanzaWatch::matching(
            session.registry(),
            roster_key(),
            "roster push that must not be sent",
            |_| true,
        )
        .expect("watch should install");

        let started = Instant::now();
        let error = watch
            .wait(Duration::from_secs(2))
            .await
            .expect_err("silence must surface as a timeout");
        assert!(matches!(error, HarnessError::Timeout { .. }));
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn a_burst_of_pushes_resolves_a_count_of_three_in_delivery_order() {
        let (session, cache) = session_with_cache();

        let watch = CountedWatch::counting(
            session.registry(),
            roster_key(),
            "three roster pushes",
            |_| true,
            3,
        )
        .expect("watch should install");

        let contacts = [
            "carol@example.com",
            "dan@example.com",
            "erin@example.com",
            "frank@example.com",
            "grace@example.com",
        ];
        for (index, jid) in contacts.iter().enumerate() {
            session.deliver(fixtures::roster_push(&format!("srv-{index}"), jid, "none"));
        }

        let pushes = watch
            .wait(HarnessConfig::default().await_timeout())
            .await
            .expect("the third push should resolve the await");

        let ids: Vec<String> = pushes
            .iter()
            .map(|stanza| {
                let Stanza::Iq(iq) = stanza else {
                    panic!("expected an iq push");
                };
                iq.id().to_string()
            })
            .collect();
        assert_eq!(ids, vec!["srv-0", "srv-1", "srv-2"]);

        // The remaining two pushes may still be in the dispatch queue.
        for _ in 0..100 {
            if cache.len() == 5 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(cache.len(), 5, "every push reaches the cache, counted or not");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn contact_removal_pushes_are_observable_too() {
        let (session, cache) = session_with_cache();
        session.deliver_now(&fixtures::roster_push("seed", CAROL.jid, "both"))
            .expect("seeding the cache should succeed");
        assert!(cache.contains(CAROL.jid));

        let watch = StanzaWatch::matching(
            session.registry(),
            roster_key(),
            "roster removal push for carol@example.com",
            push_concerns(CAROL.jid),
        )
        .expect("watch should install");

        session.deliver(fixtures::roster_remove_push("srv-2", CAROL.jid));

        watch
            .wait(HarnessConfig::default().await_timeout())
            .await
            .expect("the removal push should be observed");
        assert!(!cache.contains(CAROL.jid), "the cache processed the removal");
    }

    // ── Presence subscription announcements ──────────────────────────

    #[tokio::test(flavor = "current_thread")]
    async fn subscription_request_from_another_user_is_observed() {
        let session = ScriptedSession::new();

        let watch = StanzaWatch::matching(
            session.registry(),
            RouteKey::unscoped(StanzaKind::Presence),
            "subscription request from bob@example.com",
            |stanza| {
                let Stanza::Presence(presence) = stanza else {
                    return false;
                };
                presence.type_ == PresenceType::Subscribe
                    && presence
                        .from
                        .as_ref()
                        .is_some_and(|from| from.to_bare().to_string() == BOB.jid)
            },
        )
        .expect("watch should install");

        session.deliver(fixtures::subscribe_presence(BOB.jid));

        let announcement = watch
            .wait(HarnessConfig::default().await_timeout())
            .await
            .expect("the subscription request should be observed");
        let Stanza::Presence(presence) = announcement else {
            panic!("expected a presence stanza");
        };
        assert_eq!(presence.type_, PresenceType::Subscribe);
    }

    // ── Message relays ───────────────────────────────────────────────

    #[tokio::test(flavor = "current_thread")]
    async fn relayed_chat_message_is_observed_with_its_body_intact() {
        let session = ScriptedSession::new();

        let watch = StanzaWatch::matching(
            session.registry(),
            RouteKey::unscoped(StanzaKind::Message),
            "chat message from bob@example.com",
            |stanza| {
                let Stanza::Message(message) = stanza else {
                    return false;
                };
                message
                    .from
                    .as_ref()
                    .is_some_and(|from| from.to_bare().to_string() == BOB.jid)
            },
        )
        .expect("watch should install");

        session.deliver(fixtures::chat_message(BOB.jid, "alice@example.com", "hello"));

        let message = watch
            .wait(HarnessConfig::default().await_timeout())
            .await
            .expect("the relayed message should be observed");
        let Stanza::Message(message) = message else {
            panic!("expected a message stanza");
        };
        assert_eq!(
            message.bodies.get("").map(String::as_str),
            Some("hello")
        );
    }
}

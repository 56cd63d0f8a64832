//! Replication tests

#[cfg(test)]
mod tests {
    use gesture_defense::replication::{
        LocalHub, MirrorState, RemoteCall, ReplicationConfig, Replicator, RpcScope, SessionChannel,
    };
    use gesture_defense::types::SessionRole;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Records every send instead of delivering it.
    #[derive(Clone, Default)]
    struct Recorder {
        sent: Arc<Mutex<Vec<(RpcScope, RemoteCall)>>>,
    }

    impl SessionChannel for Recorder {
        fn send(&mut self, scope: RpcScope, call: RemoteCall) {
            self.sent.lock().push((scope, call));
        }

        fn receive(&mut self) -> Vec<RemoteCall> {
            Vec::new()
        }
    }

    fn pair() -> (Replicator, Replicator) {
        let (a, b) = LocalHub::pair();
        let config = ReplicationConfig::default();
        (
            Replicator::new(SessionRole::Authority, Box::new(a), &config),
            Replicator::new(SessionRole::Mirror, Box::new(b), &config),
        )
    }

    // -----------------------------------------------------------------------
    // Authority → mirror
    // -----------------------------------------------------------------------

    #[test]
    fn gold_update_reaches_mirror() {
        let (mut authority, mut mirror) = pair();
        let mut state = MirrorState::default();

        assert!(authority.broadcast_gold_update(150));
        for call in mirror.receive() {
            state.apply(&call);
        }
        assert_eq!(state.snapshot.gold, 150);

        // scope Others: nothing comes back to the sender
        assert!(authority.receive().is_empty());
    }

    #[test]
    fn scopes_follow_the_call_table() {
        let recorder = Recorder::default();
        let mut rep = Replicator::new(
            SessionRole::Authority,
            Box::new(recorder.clone()),
            &ReplicationConfig::default(),
        );

        rep.broadcast_phase_change("enter-combat");
        rep.broadcast_turret_select(1);
        rep.broadcast_progress_update("Segmenting", 0.4);
        rep.broadcast_complete();
        rep.broadcast_error("no marker", 3);
        rep.broadcast_gold_update(10);
        rep.broadcast_health_update(18, 20);
        rep.broadcast_wave_update(2);
        rep.broadcast_base_destroyed();
        rep.broadcast_monster_death();
        rep.broadcast_turret_info("Cannon", 120, 35.0, 6.0, 1);
        rep.broadcast_turret_cleared();

        let scopes: Vec<RpcScope> = recorder.sent.lock().iter().map(|(s, _)| *s).collect();
        assert_eq!(scopes.len(), 12);
        assert_eq!(&scopes[..2], &[RpcScope::All, RpcScope::All]);
        assert!(scopes[2..].iter().all(|s| *s == RpcScope::Others));
    }

    // -----------------------------------------------------------------------
    // Mirror gating
    // -----------------------------------------------------------------------

    #[test]
    fn mirror_authority_calls_are_no_ops() {
        let recorder = Recorder::default();
        let mut rep = Replicator::new(
            SessionRole::Mirror,
            Box::new(recorder.clone()),
            &ReplicationConfig::default(),
        );

        assert!(!rep.broadcast_gold_update(999));
        assert!(!rep.broadcast_phase_change("enter-combat"));
        assert!(!rep.broadcast_complete());
        assert!(!rep.broadcast_base_destroyed());
        assert!(!rep.broadcast_turret_info("Cannon", 1, 1.0, 1.0, 1));
        assert!(!rep.broadcast_turret_cleared());
        assert!(recorder.sent.lock().is_empty());
        assert_eq!(rep.sent_snapshot().gold, 0);

        // turret selection is open to either peer
        assert!(rep.broadcast_turret_select(0));
        assert_eq!(recorder.sent.lock().len(), 1);
    }

    #[test]
    fn mirror_call_does_not_reach_authority_state() {
        let (mut authority, mut mirror) = pair();
        mirror.broadcast_gold_update(999);
        assert!(authority.receive().is_empty());
    }

    // -----------------------------------------------------------------------
    // Loss
    // -----------------------------------------------------------------------

    #[test]
    fn lost_delta_is_not_an_error_and_later_values_win() {
        let (a, b) = LocalHub::pair_lossy(2);
        let config = ReplicationConfig::default();
        let mut authority = Replicator::new(SessionRole::Authority, Box::new(a), &config);
        let mut mirror = Replicator::new(SessionRole::Mirror, Box::new(b), &config);
        let mut state = MirrorState::default();

        authority.broadcast_wave_update(1);
        authority.broadcast_wave_update(2); // lost
        authority.broadcast_wave_update(3);
        for call in mirror.receive() {
            state.apply(&call);
        }
        assert_eq!(state.snapshot.wave_number, 3);
    }
}

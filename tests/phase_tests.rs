//! Phase controller tests

#[cfg(test)]
mod tests {
    use gesture_defense::error::{CommandError, TransportError};
    use gesture_defense::phase::{CommandSink, PhaseCommand, PhaseConfig, PhaseController, PhaseEvent};
    use gesture_defense::protocol::{ErrorNotice, PathPoint, VisionMessage};
    use gesture_defense::types::{PhaseState, Vec3};
    use bytes::Bytes;
    use std::time::{Duration, Instant};
    use tokio_test::{assert_err, assert_ok};

    #[derive(Default)]
    struct Sink {
        sent: Vec<String>,
        offline: bool,
    }

    impl CommandSink for Sink {
        fn send_command(&mut self, command: &str) -> Result<(), TransportError> {
            if self.offline {
                return Err(TransportError::NotOpen { state: "closed" });
            }
            self.sent.push(command.to_string());
            Ok(())
        }
    }

    fn controller() -> PhaseController {
        PhaseController::new(PhaseConfig::default())
    }

    fn twelve_points() -> Vec<PathPoint> {
        (0..12)
            .map(|i| PathPoint {
                x: i as f32 * 50.0,
                y: 240.0,
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Timeout
    // -----------------------------------------------------------------------

    #[test]
    fn scan_timeout_fires_exactly_once() {
        let mut phase = controller();
        let mut sink = Sink::default();
        let t0 = Instant::now();

        phase
            .request(PhaseCommand::BeginPlanningScan, &mut sink, t0)
            .unwrap();
        phase.take_events();

        phase.tick(t0 + Duration::from_secs(29));
        assert!(phase.pending().is_some());

        phase.tick(t0 + Duration::from_secs(30));
        assert!(phase.status().is_some());
        phase.tick(t0 + Duration::from_secs(31));
        phase.tick(t0 + Duration::from_secs(60));

        let timeouts = phase
            .take_events()
            .into_iter()
            .filter(|e| *e == PhaseEvent::ScanTimedOut)
            .count();
        assert_eq!(timeouts, 1);
        assert!(phase.pending().is_none());
        assert_eq!(phase.phase(), PhaseState::Planning);
        // banner expired by now
        assert!(phase.status().is_none());
    }

    #[test]
    fn retry_after_timeout_is_accepted() {
        let mut phase = controller();
        let mut sink = Sink::default();
        let t0 = Instant::now();

        phase
            .request(PhaseCommand::BeginPlanningScan, &mut sink, t0)
            .unwrap();
        phase.tick(t0 + Duration::from_secs(30));
        assert_ok!(phase.request(
            PhaseCommand::BeginPlanningScan,
            &mut sink,
            t0 + Duration::from_secs(31)
        ));
        assert_eq!(sink.sent, vec!["process-scan", "process-scan"]);
    }

    #[test]
    fn huge_timeouts_do_not_overflow() {
        let mut phase = PhaseController::new(PhaseConfig {
            scan_timeout_ms: u64::MAX,
            status_ms: u64::MAX,
            ..PhaseConfig::default()
        });
        let mut sink = Sink::default();
        let t0 = Instant::now();

        assert_ok!(phase.request(PhaseCommand::BeginPlanningScan, &mut sink, t0));
        phase.tick(t0 + Duration::from_secs(3_600));
        assert!(phase.pending().is_some());

        phase.handle_message(
            &VisionMessage::ErrorNotice(ErrorNotice {
                error: "no marker".into(),
                code: 3,
            }),
            t0,
        );
        phase.tick(t0 + Duration::from_secs(3_600));
        assert!(phase.status().is_some());
    }

    // -----------------------------------------------------------------------
    // Single outstanding request
    // -----------------------------------------------------------------------

    #[test]
    fn second_command_rejected_while_pending() {
        let mut phase = controller();
        let mut sink = Sink::default();
        let t0 = Instant::now();

        phase
            .request(PhaseCommand::BeginPlanningScan, &mut sink, t0)
            .unwrap();
        let before = *phase.pending().unwrap();

        let err = phase
            .request(PhaseCommand::EnterCombat, &mut sink, t0 + Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::RequestPending {
                pending: "process-scan"
            }
        ));
        assert_eq!(*phase.pending().unwrap(), before);
        assert_eq!(phase.phase(), PhaseState::Planning);
        assert_eq!(sink.sent, vec!["process-scan"]);
    }

    #[test]
    fn failed_scan_send_leaves_nothing_pending() {
        let mut phase = controller();
        let mut sink = Sink {
            offline: true,
            ..Default::default()
        };
        let err = assert_err!(phase.request(
            PhaseCommand::BeginPlanningScan,
            &mut sink,
            Instant::now()
        ));
        assert!(matches!(err, CommandError::Transport(_)));
        assert!(phase.pending().is_none());
    }

    #[test]
    fn combat_toggles_even_when_backend_is_down() {
        let mut phase = controller();
        let mut sink = Sink {
            offline: true,
            ..Default::default()
        };
        let now = Instant::now();
        assert_ok!(phase.request(PhaseCommand::EnterCombat, &mut sink, now));
        assert_eq!(phase.phase(), PhaseState::Combat);
        assert_ok!(phase.request(PhaseCommand::ExitCombat, &mut sink, now));
        assert_eq!(phase.phase(), PhaseState::Planning);
    }

    // -----------------------------------------------------------------------
    // End-to-end scan
    // -----------------------------------------------------------------------

    #[test]
    fn scan_mask_then_path_completes_planning() {
        let mut phase = controller();
        let mut sink = Sink::default();
        let t0 = Instant::now();

        phase
            .request(PhaseCommand::BeginPlanningScan, &mut sink, t0)
            .unwrap();
        phase.handle_message(
            &VisionMessage::SegmentationMask(Bytes::from_static(b"\x89PNG")),
            t0 + Duration::from_secs(2),
        );
        phase.handle_message(
            &VisionMessage::PathPoints(twelve_points()),
            t0 + Duration::from_secs(3),
        );

        assert!(phase.pending().is_none());
        let path = phase.path().unwrap();
        assert_eq!(path.len(), 12);
        // (0, 240) is the left edge, halfway up the 640x480 image
        assert_eq!(path.start(), Some(Vec3::new(0.0, 0.0, 12.0)));

        let events = phase.take_events();
        assert!(matches!(events[0], PhaseEvent::ScanStarted));
        assert!(matches!(events[1], PhaseEvent::SegmentationReceived { .. }));
        assert!(matches!(events[2], PhaseEvent::PlanningComplete { ref path } if path.len() == 12));

        // no late timeout once complete
        phase.tick(t0 + Duration::from_secs(45));
        assert!(phase.take_events().is_empty());
    }

    #[test]
    fn path_hands_over_on_combat_and_returns_on_exit() {
        let mut phase = controller();
        let mut sink = Sink::default();
        let now = Instant::now();

        phase
            .request(PhaseCommand::BeginPlanningScan, &mut sink, now)
            .unwrap();
        phase.handle_message(&VisionMessage::PathPoints(twelve_points()), now);
        phase.take_events();

        phase.request(PhaseCommand::EnterCombat, &mut sink, now).unwrap();
        phase.request(PhaseCommand::EnterCombat, &mut sink, now).unwrap();
        phase.request(PhaseCommand::ExitCombat, &mut sink, now).unwrap();

        let events = phase.take_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], PhaseEvent::CombatStarted { path: Some(p) } if p.len() == 12));
        assert!(matches!(&events[1], PhaseEvent::CombatEnded { path: Some(p) } if p.len() == 12));
        assert_eq!(sink.sent, vec!["process-scan", "enter-combat", "exit-combat"]);
    }

    #[test]
    fn connection_loss_counts_as_timeout() {
        let mut phase = controller();
        let mut sink = Sink::default();
        let now = Instant::now();

        phase
            .request(PhaseCommand::BeginPlanningScan, &mut sink, now)
            .unwrap();
        phase.take_events();
        phase.connection_lost(now);
        phase.connection_lost(now);

        assert_eq!(phase.take_events(), vec![PhaseEvent::ScanTimedOut]);
        assert!(phase.pending().is_none());
    }
}

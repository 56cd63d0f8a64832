//! Wave scheduler tests

#[cfg(test)]
mod tests {
    use gesture_defense::types::{Vec3, WorldPath};
    use gesture_defense::waves::{
        MonsterArchetype, MonsterOutcome, SubWave, WaveConfig, WaveDefinition, WaveEvent,
        WaveScheduler,
    };
    use std::time::{Duration, Instant};

    fn path() -> WorldPath {
        WorldPath::new(vec![Vec3::zero(), Vec3::new(10.0, 0.0, 0.0)])
    }

    /// Three single-monster waves of one kind.
    fn three_wave_config() -> WaveConfig {
        let wave = |name: &str| WaveDefinition {
            name: name.into(),
            subwaves: vec![SubWave {
                monster_kind: "grunt".into(),
                count: 1,
                delay_ms: 0,
            }],
        };
        WaveConfig {
            definitions: vec![wave("one"), wave("two"), wave("three")],
            monsters: vec![MonsterArchetype {
                kind: "grunt".into(),
                base_health: 100.0,
                base_speed: 2.0,
                reward: 5,
                damage: 1,
            }],
            health_multiplier: 1.5,
            speed_multiplier: 1.1,
            spawn_interval_ms: 500,
            inter_wave_delay_ms: 1_000,
        }
    }

    fn spawned(events: &[WaveEvent]) -> Vec<(u64, f32, f32)> {
        events
            .iter()
            .filter_map(|e| match e {
                WaveEvent::MonsterSpawned { monster } => {
                    Some((monster.id, monster.health, monster.speed))
                }
                _ => None,
            })
            .collect()
    }

    /// Run one full wave: spawn, kill everything, wait out the break.
    fn clear_wave(s: &mut WaveScheduler, now: &mut Instant) -> Vec<WaveEvent> {
        let mut events = s.tick(*now);
        for (id, _, _) in spawned(&events) {
            events.extend(s.monster_resolved(id, MonsterOutcome::Killed, *now));
        }
        *now += Duration::from_millis(1_000);
        events
    }

    // -----------------------------------------------------------------------
    // Spawning
    // -----------------------------------------------------------------------

    #[test]
    fn subwaves_respect_delay_and_spacing() {
        let mut config = three_wave_config();
        config.definitions[0].subwaves = vec![
            SubWave {
                monster_kind: "grunt".into(),
                count: 2,
                delay_ms: 0,
            },
            SubWave {
                monster_kind: "grunt".into(),
                count: 1,
                delay_ms: 2_000,
            },
        ];
        let mut s = WaveScheduler::new(config);
        let t0 = Instant::now();
        let (started, events) = s.start(path(), t0);
        assert!(started);
        assert!(matches!(events[0], WaveEvent::WaveStarted { wave_number: 1, .. }));

        assert_eq!(spawned(&s.tick(t0)).len(), 1);
        assert_eq!(spawned(&s.tick(t0 + Duration::from_millis(499))).len(), 0);
        assert_eq!(spawned(&s.tick(t0 + Duration::from_millis(500))).len(), 1);
        assert_eq!(spawned(&s.tick(t0 + Duration::from_millis(2_499))).len(), 0);
        assert_eq!(spawned(&s.tick(t0 + Duration::from_millis(2_500))).len(), 1);
        assert_eq!(s.run_state().monsters_alive, 3);
        assert_eq!(s.pending_tasks(), 0);
    }

    #[test]
    fn invalid_path_does_not_start() {
        let mut s = WaveScheduler::new(three_wave_config());
        let (started, events) = s.start(WorldPath::new(vec![Vec3::zero()]), Instant::now());
        assert!(!started);
        assert!(events.is_empty());
        assert!(!s.is_running());
    }

    #[test]
    fn huge_delays_are_capped_not_overflowed() {
        let mut config = three_wave_config();
        config.definitions[0].subwaves[0].count = 2;
        config.definitions[0].subwaves[0].delay_ms = u64::MAX;
        config.spawn_interval_ms = u64::MAX;
        config.inter_wave_delay_ms = u64::MAX;
        let mut s = WaveScheduler::new(config);
        let t0 = Instant::now();

        let (started, _) = s.start(path(), t0);
        assert!(started);
        assert_eq!(s.pending_tasks(), 2);
        assert!(spawned(&s.tick(t0 + Duration::from_secs(3_600))).is_empty());

        let day = Duration::from_secs(24 * 60 * 60);
        assert_eq!(spawned(&s.tick(t0 + day)).len(), 1);
        assert_eq!(spawned(&s.tick(t0 + day * 2)).len(), 1);
    }

    // -----------------------------------------------------------------------
    // Difficulty cycle
    // -----------------------------------------------------------------------

    #[test]
    fn tier_one_health_is_base_times_multiplier() {
        let mut s = WaveScheduler::new(three_wave_config());
        let mut now = Instant::now();
        s.start(path(), now);

        let mut cycled = false;
        for _ in 0..3 {
            let events = clear_wave(&mut s, &mut now);
            cycled |= events
                .iter()
                .any(|e| matches!(e, WaveEvent::CycleCompleted { tier: 1 }));
        }
        assert!(cycled);
        assert_eq!(s.run_state().definition_index, 0);
        assert_eq!(s.run_state().difficulty_tier, 1);

        // break elapsed: wave 4 starts and its first monster spawns at tier 1
        let events = s.tick(now);
        assert!(events
            .iter()
            .any(|e| matches!(e, WaveEvent::WaveStarted { wave_number: 4, tier: 1, .. })));
        let (_, health, speed) = spawned(&events)[0];
        assert!((health - 150.0).abs() < 1e-4);
        assert!((speed - 2.2).abs() < 1e-4);
    }

    #[test]
    fn wave_completes_only_when_every_monster_resolved() {
        let mut config = three_wave_config();
        config.definitions[0].subwaves[0].count = 2;
        config.spawn_interval_ms = 0;
        let mut s = WaveScheduler::new(config);
        let now = Instant::now();
        s.start(path(), now);

        let ids: Vec<u64> = spawned(&s.tick(now)).into_iter().map(|m| m.0).collect();
        assert_eq!(ids.len(), 2);

        let first = s.monster_resolved(ids[0], MonsterOutcome::ReachedEnd, now);
        assert!(!first
            .iter()
            .any(|e| matches!(e, WaveEvent::WaveCompleted { .. })));
        // a second report for the same monster is ignored
        assert!(s
            .monster_resolved(ids[0], MonsterOutcome::Killed, now)
            .is_empty());

        let second = s.monster_resolved(ids[1], MonsterOutcome::Killed, now);
        assert!(second
            .iter()
            .any(|e| matches!(e, WaveEvent::WaveCompleted { wave_number: 1 })));
        assert!(!s.run_state().in_progress);
        assert_eq!(s.pending_tasks(), 1);
    }

    // -----------------------------------------------------------------------
    // Stop
    // -----------------------------------------------------------------------

    #[test]
    fn stop_all_waves_clears_everything() {
        let mut config = three_wave_config();
        config.definitions[0].subwaves[0].count = 5;
        let mut s = WaveScheduler::new(config);
        let t0 = Instant::now();
        s.start(path(), t0);
        s.tick(t0 + Duration::from_millis(600));
        assert_eq!(s.run_state().monsters_alive, 2);
        assert_eq!(s.pending_tasks(), 3);

        let events = s.stop_all_waves();
        let despawned = events
            .iter()
            .filter(|e| matches!(e, WaveEvent::MonsterDespawned { .. }))
            .count();
        assert_eq!(despawned, 2);
        assert_eq!(s.run_state().monsters_alive, 0);
        assert_eq!(s.pending_tasks(), 0);
        assert_eq!(s.live_monsters().count(), 0);

        // nothing left to fire
        assert!(s.tick(t0 + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn invalidated_path_withholds_next_wave() {
        let mut s = WaveScheduler::new(three_wave_config());
        let mut now = Instant::now();
        s.start(path(), now);
        clear_wave(&mut s, &mut now);
        s.invalidate_path();

        let events = s.tick(now);
        assert!(!events
            .iter()
            .any(|e| matches!(e, WaveEvent::WaveStarted { .. })));
        assert!(!s.is_running());
    }
}

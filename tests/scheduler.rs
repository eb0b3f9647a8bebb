mod common;

use common::*;
use glam::Vec3;
use itertools::Itertools;
use objcache::cache::entry::{EntryState, LocalId, NO_UPDATE_FLAGS};
use objcache::region::camera::CameraState;
use objcache::region::region_cache::RegionCache;
use objcache::settings::{CacheSettings, CreationThrottle};
use std::time::Duration;

const FRAME: Duration = Duration::from_secs(1);

fn count_in(region: &RegionCache<RecordingScene>, ids: &[LocalId], state: EntryState) -> usize {
    ids.iter().filter(|&&local_id| region.state_of(local_id) == Some(state)).count()
}

/// Ten roots in a tight cluster around (100, 100, 20)
fn clustered_region(settings: &CacheSettings) -> (RegionCache<RecordingScene>, Vec<LocalId>) {
    let (mut region, _log) = memory_region(settings);
    let ids = (1..=10).collect_vec();
    for &local_id in &ids {
        let position = Vec3::new(95.0 + local_id as f32, 100.0, 20.0);
        region.apply_full_update(local_id, 1, root_payload(position), NO_UPDATE_FLAGS);
    }
    (region, ids)
}

#[test]
fn promotion_respects_the_throttle() {
    let settings = CacheSettings {
        creation_throttle: 3,
        ..memory_settings()
    };
    let (mut region, ids) = clustered_region(&settings);
    region.scene_mut().deferred = true;
    let camera = camera_at(Vec3::new(100.0, 100.0, 25.0));

    region.idle_update(&camera, FRAME);
    assert_eq!(count_in(&region, &ids, EntryState::Waiting), 3);
    assert_eq!(count_in(&region, &ids, EntryState::Queued), 7);
    assert_eq!(region.scheduler().queued_count(), 7);
    // leftovers remember that they were passed over
    assert!(
        ids.iter()
            .filter_map(|&local_id| region.entry(local_id))
            .filter(|entry| entry.state == EntryState::Queued)
            .all(|entry| entry.queued_passes == 1)
    );

    region.idle_update(&camera, FRAME);
    assert_eq!(count_in(&region, &ids, EntryState::Waiting), 6);
    assert_eq!(count_in(&region, &ids, EntryState::Queued), 4);

    region.idle_update(&camera, FRAME);
    region.idle_update(&camera, FRAME);
    assert_eq!(count_in(&region, &ids, EntryState::Waiting), 10);
    assert_eq!(region.scheduler().queued_count(), 0);
    assert_eq!(region.verify_entry_states(), 0);
}

#[test]
fn closest_candidates_go_first() {
    let settings = CacheSettings {
        creation_throttle: 1,
        ..memory_settings()
    };
    let (mut region, _ids) = clustered_region(&settings);

    // everything is within the near radius, so distance decides
    region.idle_update(&camera_at(Vec3::new(105.0, 100.0, 20.0)), FRAME);
    assert_eq!(region.state_of(10), Some(EntryState::Active));
    assert_eq!(region.scheduler().active_count(), 1);
}

#[test]
fn one_promotion_even_without_time() {
    let (mut region, ids) = clustered_region(&memory_settings());
    region.idle_update(&camera_at(Vec3::new(100.0, 100.0, 25.0)), Duration::ZERO);
    assert!(count_in(&region, &ids, EntryState::Active) >= 1);
}

#[test]
fn far_objects_stay_inactive() {
    let (mut region, ids) = clustered_region(&memory_settings());
    for _ in 0..6 {
        region.idle_update(&camera_at(Vec3::new(2000.0, 2000.0, 25.0)), FRAME);
    }
    assert_eq!(count_in(&region, &ids, EntryState::Inactive), 10);
    assert_eq!(region.indexed_count(), 10);
}

fn looking_away() -> CameraState {
    CameraState::look_at(
        Vec3::new(120.0, 128.0, 20.0),
        Vec3::new(250.0, 128.0, 20.0),
        60f32.to_radians(),
        16.0 / 9.0,
        128.0,
        720,
    )
}

#[test]
fn invisible_objects_decay() {
    let settings = CacheSettings {
        non_visible_frames: 8,
        ..memory_settings()
    };
    let (mut region, log) = memory_region(&settings);
    region.apply_full_update(1, 1, root_payload(Vec3::new(10.0, 128.0, 20.0)), NO_UPDATE_FLAGS);
    region.apply_full_update(2, 1, child_payload(1), NO_UPDATE_FLAGS);

    region.idle_update(&camera_at(Vec3::new(20.0, 128.0, 20.0)), FRAME);
    region.idle_update(&camera_at(Vec3::new(20.0, 128.0, 20.0)), FRAME);
    assert_eq!(region.state_of(1), Some(EntryState::Active));
    assert_eq!(region.state_of(2), Some(EntryState::Active));
    assert_eq!(region.entry(1).unwrap().last_visible_frame, 2);

    // last seen in frame 2, it survives until frame 2 + non_visible_frames - 1
    for _ in 3..=8 {
        region.idle_update(&looking_away(), FRAME);
        assert_eq!(region.state_of(1), Some(EntryState::Active));
    }

    region.idle_update(&looking_away(), FRAME);
    assert_eq!(region.state_of(1), Some(EntryState::Inactive));
    assert_eq!(region.state_of(2), Some(EntryState::Inactive));
    assert!(region.is_indexed(1));
    assert_eq!(region.stats().decays, 1);
    assert_eq!(log.borrow().released.iter().sorted().collect_vec(), vec![&1, &2]);
    assert_eq!(region.verify_entry_states(), 0);
}

#[test]
fn selected_objects_never_decay() {
    let settings = CacheSettings {
        non_visible_frames: 2,
        ..memory_settings()
    };
    let (mut region, _log) = memory_region(&settings);
    region.apply_full_update(1, 1, root_payload(Vec3::new(10.0, 128.0, 20.0)), NO_UPDATE_FLAGS);
    region.idle_update(&camera_at(Vec3::new(20.0, 128.0, 20.0)), FRAME);
    region.scene_mut().interacting.insert(1);

    for _ in 0..20 {
        region.idle_update(&looking_away(), FRAME);
    }
    assert_eq!(region.state_of(1), Some(EntryState::Active));
}

#[test]
fn interacting_grandchildren_keep_the_linkset() {
    let settings = CacheSettings {
        non_visible_frames: 2,
        ..memory_settings()
    };
    let (mut region, _log) = memory_region(&settings);
    region.apply_full_update(1, 1, root_payload(Vec3::new(10.0, 128.0, 20.0)), NO_UPDATE_FLAGS);
    region.apply_full_update(2, 1, child_payload(1), NO_UPDATE_FLAGS);
    region.apply_full_update(3, 1, child_payload(2), NO_UPDATE_FLAGS);
    for _ in 0..4 {
        region.idle_update(&camera_at(Vec3::new(20.0, 128.0, 20.0)), FRAME);
    }
    assert_eq!(region.state_of(3), Some(EntryState::Active));
    region.scene_mut().interacting.insert(3);

    for _ in 0..20 {
        region.idle_update(&looking_away(), FRAME);
    }
    assert_eq!(region.state_of(1), Some(EntryState::Active));
    assert_eq!(region.state_of(2), Some(EntryState::Active));
    assert_eq!(region.state_of(3), Some(EntryState::Active));

    region.scene_mut().interacting.clear();
    region.idle_update(&looking_away(), FRAME);
    region.idle_update(&looking_away(), FRAME);
    assert_eq!(region.state_of(1), Some(EntryState::Inactive));
    assert_eq!(region.state_of(3), Some(EntryState::Inactive));
}

#[test]
fn queued_children_rank_by_their_root() {
    let settings = CacheSettings {
        creation_throttle: 1,
        ..memory_settings()
    };
    let (mut region, _log) = memory_region(&settings);
    let camera = camera_at(Vec3::new(100.0, 100.0, 20.0));
    region.apply_full_update(1, 1, root_payload(Vec3::new(108.0, 100.0, 20.0)), NO_UPDATE_FLAGS);
    region.apply_full_update(2, 1, root_payload(Vec3::new(101.0, 100.0, 20.0)), NO_UPDATE_FLAGS);
    region.idle_update(&camera, FRAME);
    region.idle_update(&camera, FRAME);
    assert_eq!(region.state_of(1), Some(EntryState::Active));
    assert_eq!(region.state_of(2), Some(EntryState::Active));

    // same offset from their parents, only the roots tell them apart
    region.apply_full_update(10, 1, child_payload(1), NO_UPDATE_FLAGS);
    region.apply_full_update(20, 1, child_payload(2), NO_UPDATE_FLAGS);
    assert_eq!(region.scheduler().queued_count(), 2);

    region.idle_update(&camera, FRAME);
    assert_eq!(region.state_of(20), Some(EntryState::Active));
    assert_eq!(region.state_of(10), Some(EntryState::Queued));
}

#[test]
fn paused_creation_freezes_everything() {
    let settings = CacheSettings {
        non_visible_frames: 2,
        ..memory_settings()
    };
    let (mut region, ids) = clustered_region(&settings);
    let near = camera_at(Vec3::new(100.0, 100.0, 25.0));

    region.pause_creation();
    assert_eq!(region.scheduler().throttle(), CreationThrottle::Paused);
    region.idle_update(&near, FRAME);
    assert_eq!(count_in(&region, &ids, EntryState::Inactive), 10);

    region.resume_creation();
    region.idle_update(&near, FRAME);
    assert_eq!(count_in(&region, &ids, EntryState::Active), 10);

    // no decay either while paused
    region.pause_creation();
    for _ in 0..10 {
        region.idle_update(&camera_at(Vec3::new(2000.0, 2000.0, 25.0)), FRAME);
    }
    assert_eq!(count_in(&region, &ids, EntryState::Active), 10);
}

#[test]
fn configured_pause_resumes_unlimited() {
    let settings = CacheSettings {
        creation_throttle: 0,
        ..memory_settings()
    };
    let (mut region, ids) = clustered_region(&settings);
    let near = camera_at(Vec3::new(100.0, 100.0, 25.0));

    region.idle_update(&near, FRAME);
    assert_eq!(count_in(&region, &ids, EntryState::Inactive), 10);

    region.resume_creation();
    assert_eq!(region.scheduler().throttle(), CreationThrottle::Unlimited);
    region.idle_update(&near, FRAME);
    assert_eq!(count_in(&region, &ids, EntryState::Active), 10);
}

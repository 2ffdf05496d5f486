use picture_frame::epoch;
use picture_frame::events::{RotationCommand, Switched};
use picture_frame::pictures::{Pictures, PicturesConfig};
use picture_frame::schedule::DayWatch;
use picture_frame::sequence::{Selector, SequenceConfig};
use picture_frame::tasks::rotation::{self, Rotation};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn open(dir: &Path, selector: Selector) -> Rotation {
    let pictures = Pictures::new(PicturesConfig {
        directory: dir.to_path_buf(),
        extensions: vec!["jpg".into()],
    })
    .unwrap();
    Rotation::open(pictures, selector).unwrap()
}

fn populate(dir: &Path, names: &[&str]) {
    for name in names {
        fs::write(dir.join(name), b"x").unwrap();
    }
}

fn stored_config(dir: &Path) -> SequenceConfig {
    let raw = fs::read_to_string(dir.join(".pictureframe/sequence.json")).unwrap();
    serde_json::from_str(&raw).unwrap()
}

#[test]
fn open_persists_sequence_for_catalog() {
    let tmp = tempdir().unwrap();
    populate(tmp.path(), &["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"]);

    let rotation = open(tmp.path(), Selector::Rotate);
    assert_eq!(rotation.sequence().length(), 5);
    assert_eq!(rotation.sequence().increment(), 3);

    let stored = stored_config(tmp.path());
    assert_eq!(stored.length, 5);
    assert_eq!(stored.increment, Some(3));
    assert_eq!(stored.selector, Selector::Rotate);
}

#[test]
fn configured_selector_overrides_stored_one() {
    let tmp = tempdir().unwrap();
    populate(tmp.path(), &["a.jpg", "b.jpg"]);
    fs::create_dir(tmp.path().join(".pictureframe")).unwrap();
    fs::write(
        tmp.path().join(".pictureframe/sequence.json"),
        r#"{"length": 2, "increment": 1, "selector": "random"}"#,
    )
    .unwrap();

    let rotation = open(tmp.path(), Selector::Unshown);
    assert_eq!(rotation.sequence().selector(), Selector::Unshown);
    assert_eq!(stored_config(tmp.path()).selector, Selector::Unshown);
}

#[test]
fn advance_walks_the_sequence() {
    let tmp = tempdir().unwrap();
    populate(tmp.path(), &["a.jpg", "b.jpg", "c.jpg"]);
    let mut rotation = open(tmp.path(), Selector::Rotate);
    let mut switched = rotation.subscribe();

    // Length 3 steps by one.
    assert!(rotation.advance(3).unwrap());
    assert_eq!(rotation.pictures().current().unwrap().file, "a.jpg");
    assert!(!rotation.advance(3).unwrap(), "same day, same picture");
    assert!(rotation.advance(4).unwrap());
    assert_eq!(rotation.pictures().current().unwrap().file, "b.jpg");

    let files: Vec<String> = std::iter::from_fn(|| switched.try_recv().ok())
        .filter_map(|Switched(p)| p.map(|p| p.file))
        .collect();
    assert_eq!(files, vec!["a.jpg".to_string(), "b.jpg".to_string()]);
    assert!(rotation.pictures().history_file().exists());
}

#[test]
fn advance_on_empty_catalog_does_nothing() {
    let tmp = tempdir().unwrap();
    let mut rotation = open(tmp.path(), Selector::Rotate);
    assert!(!rotation.advance(42).unwrap());
    assert!(rotation.pictures().current().is_none());
    assert!(rotation.plan(42, 7).is_empty());
}

#[test]
fn reload_resizes_and_repicks() {
    let tmp = tempdir().unwrap();
    populate(tmp.path(), &["a.jpg", "b.jpg", "c.jpg"]);
    let mut rotation = open(tmp.path(), Selector::Rotate);
    rotation.advance(5).unwrap();

    populate(tmp.path(), &["d.jpg"]);
    assert_eq!(rotation.reload(5).unwrap(), 4);
    assert_eq!(rotation.sequence().length(), 4);
    assert_eq!(rotation.sequence().increment(), 3);
    assert_eq!(stored_config(tmp.path()).length, 4);
    // 5 * 3 mod 4
    assert_eq!(rotation.pictures().current().unwrap().file, "d.jpg");
}

#[test]
fn switch_overrides_until_next_advance() {
    let tmp = tempdir().unwrap();
    populate(tmp.path(), &["a.jpg", "b.jpg", "c.jpg"]);
    let mut rotation = open(tmp.path(), Selector::Rotate);
    rotation.advance(3).unwrap();

    assert!(rotation.switch("c.jpg").unwrap());
    assert!(!rotation.switch("nope.jpg").unwrap());
    assert_eq!(rotation.pictures().current().unwrap().file, "c.jpg");

    rotation.advance(4).unwrap();
    assert_eq!(rotation.pictures().current().unwrap().file, "b.jpg");
}

#[test]
fn plan_lists_upcoming_days() {
    let tmp = tempdir().unwrap();
    populate(tmp.path(), &["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"]);
    let rotation = open(tmp.path(), Selector::Rotate);

    let plan: Vec<(u32, &str)> = rotation
        .plan(1, 5)
        .into_iter()
        .map(|(day, p)| (day, p.file.as_str()))
        .collect();
    assert_eq!(
        plan,
        vec![(1, "d.jpg"), (2, "b.jpg"), (3, "e.jpg"), (4, "c.jpg"), (5, "a.jpg")]
    );
    assert!(rotation.pictures().current().is_none());
}

#[test]
fn unshown_prefers_pictures_never_shown() {
    let tmp = tempdir().unwrap();
    populate(tmp.path(), &["a.jpg", "b.jpg", "c.jpg"]);
    let mut rotation = open(tmp.path(), Selector::Unshown);

    let today = epoch::today_to_number();
    let mut seen = Vec::new();
    for day in today..today + 3 {
        rotation.advance(day).unwrap();
        seen.push(rotation.pictures().current().unwrap().file.clone());
    }
    seen.sort();
    assert_eq!(seen, vec!["a.jpg", "b.jpg", "c.jpg"]);
}

#[test]
fn unshown_keeps_the_day_pick_across_restart_and_reload() {
    let tmp = tempdir().unwrap();
    populate(
        tmp.path(),
        &["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg", "f.jpg"],
    );
    let today = epoch::today_to_number();

    let first = {
        let mut rotation = open(tmp.path(), Selector::Unshown);
        assert!(rotation.advance(today).unwrap());
        assert!(!rotation.advance(today).unwrap(), "same day, same picture");
        rotation.reload(today).unwrap();
        rotation.pictures().current().unwrap().file.clone()
    };

    let mut reopened = open(tmp.path(), Selector::Unshown);
    reopened.advance(today).unwrap();
    assert_eq!(reopened.pictures().current().unwrap().file, first);
}

#[test]
fn switch_is_announced_when_history_cannot_be_saved() {
    let tmp = tempdir().unwrap();
    populate(tmp.path(), &["a.jpg", "b.jpg", "c.jpg"]);
    let mut rotation = open(tmp.path(), Selector::Rotate);
    let mut switched = rotation.subscribe();

    // A directory in place of the history file makes the rename fail.
    fs::create_dir(rotation.pictures().history_file()).unwrap();

    assert!(rotation.advance(3).is_err());
    assert!(matches!(switched.try_recv(), Ok(Switched(Some(p))) if p.file == "a.jpg"));

    assert!(rotation.switch("c.jpg").is_err());
    assert!(matches!(switched.try_recv(), Ok(Switched(Some(p))) if p.file == "c.jpg"));
    assert_eq!(rotation.pictures().current().unwrap().file, "c.jpg");
}

#[test]
fn load_leaves_stored_sequence_alone() {
    let tmp = tempdir().unwrap();
    populate(tmp.path(), &["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"]);
    let pictures = Pictures::new(PicturesConfig {
        directory: tmp.path().to_path_buf(),
        extensions: vec!["jpg".into()],
    })
    .unwrap();

    let rotation = Rotation::load(pictures, Selector::Rotate).unwrap();
    assert_eq!(rotation.plan(1, 5).len(), 5);
    assert!(!tmp.path().join(".pictureframe/sequence.json").exists());
}

async fn next(switched: &mut UnboundedReceiver<Switched>) -> String {
    match timeout(Duration::from_secs(5), switched.recv())
        .await
        .expect("timeout waiting for switch")
    {
        Some(Switched(Some(p))) => p.file,
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_follows_days_and_commands() {
    let tmp = tempdir().unwrap();
    populate(tmp.path(), &["a.jpg", "b.jpg", "c.jpg"]);
    let mut rotation = open(tmp.path(), Selector::Rotate);
    let mut switched = rotation.subscribe();

    let today = Arc::new(AtomicU32::new(3));
    let watch = DayWatch::with_clock(Duration::from_millis(10), {
        let today = Arc::clone(&today);
        Arc::new(move || today.load(Ordering::SeqCst))
    });
    let days = watch.subscribe();
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(rotation::run(rotation, cmd_rx, days, cancel.clone()));

    assert_eq!(next(&mut switched).await, "a.jpg");

    today.store(4, Ordering::SeqCst);
    assert_eq!(next(&mut switched).await, "b.jpg");

    cmd_tx
        .send(RotationCommand::Switch("c.jpg".into()))
        .await
        .unwrap();
    assert_eq!(next(&mut switched).await, "c.jpg");

    // Reload re-picks day 4.
    cmd_tx.send(RotationCommand::Reload).await.unwrap();
    assert_eq!(next(&mut switched).await, "b.jpg");

    cancel.cancel();
    let res = timeout(Duration::from_secs(5), handle)
        .await
        .expect("rotation task did not stop");
    assert!(res.unwrap().is_ok());
}

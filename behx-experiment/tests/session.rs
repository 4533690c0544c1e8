use behx_core::{
    Block, Completion, CompletionKind, EventDraft, FieldValue, PresentError, Presenter, StageArgs,
    StageKind,
};
use behx_experiment::{
    BlockQueueManager, OutputFormat, OutputNaming, SessionError, SessionPlan, SessionState,
    WashoutPolicy,
};
use behx_log::{parse_flat, EventLog};
use behx_timing::ManualClock;
use behx_trigger::{DryRunOutput, TriggerSettings};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

#[derive(Default)]
struct Slot {
    done: Option<Completion>,
    args: Option<StageArgs>,
    halts: usize,
}

/// Presenter that parks its completion so the test can decide when the
/// stage ends.
#[derive(Clone, Default)]
struct Scripted(Rc<RefCell<Slot>>);

impl Presenter for Scripted {
    fn run(&mut self, args: &StageArgs, done: Completion) -> Result<(), PresentError> {
        let mut slot = self.0.borrow_mut();
        slot.done = Some(done);
        slot.args = Some(args.clone());
        Ok(())
    }

    fn halt(&mut self) {
        let mut slot = self.0.borrow_mut();
        if slot.done.take().is_some() {
            slot.halts += 1;
        }
    }
}

struct Rig {
    mgr: BlockQueueManager<ManualClock>,
    clock: ManualClock,
    slots: HashMap<StageKind, Scripted>,
}

impl Rig {
    fn new(plan: SessionPlan, log: EventLog<ManualClock>, clock: ManualClock) -> Self {
        let mut mgr = BlockQueueManager::new(plan, log);
        let mut slots = HashMap::new();
        for kind in StageKind::ALL {
            let scripted = Scripted::default();
            mgr.stages_mut().register(kind, Box::new(scripted.clone()));
            slots.insert(kind, scripted);
        }
        Self { mgr, clock, slots }
    }

    fn with_plan(plan: SessionPlan) -> Self {
        let clock = ManualClock::default();
        Self::new(plan, EventLog::new(clock.clone()), clock)
    }

    fn slot(&self, kind: StageKind) -> std::cell::Ref<'_, Slot> {
        self.slots[&kind].0.borrow()
    }

    /// Completes the stage currently on screen and dispatches the result.
    fn complete(&mut self, kind: CompletionKind, event: EventDraft) {
        let (_, entry) = self.mgr.sequencer().current().expect("a stage is running");
        let stage = entry.stage;
        let done = self.slot(stage).done.clone().expect("stage was run");
        assert!(done.signal(kind, event));
        self.mgr.drain().unwrap();
    }

    fn current(&self) -> Option<StageKind> {
        self.mgr.sequencer().current().map(|(_, e)| e.stage)
    }

    /// Drives whatever stage is current with its usual completion.
    fn finish_current(&mut self) {
        let stage = self.current().expect("a stage is running");
        match stage {
            StageKind::Instructions => self.complete(
                CompletionKind::Ok,
                EventDraft::new("Instructions").with("Accepted", true),
            ),
            StageKind::Washout => {
                let secs = self
                    .slot(StageKind::Washout)
                    .args
                    .as_ref()
                    .and_then(|a| a.duration)
                    .unwrap_or_default();
                self.clock.advance(secs);
                self.complete(
                    CompletionKind::Timeout,
                    EventDraft::new("Washout_Finished").with("Duration", secs.as_secs_f64()),
                )
            }
            StageKind::Video => {
                let video = self.playing_video();
                self.clock.advance(Duration::from_secs(30));
                self.complete(
                    CompletionKind::Finish,
                    EventDraft::new("Video_Finished").with("Video", video),
                )
            }
            StageKind::Questionnaire | StageKind::Rating => self.complete(
                CompletionKind::Finish,
                EventDraft::new("Questionnaire_AnswerConfirmed").with("Answer", 3),
            ),
            StageKind::Finish => self.complete(CompletionKind::Finish, EventDraft::new("Finished")),
        }
    }

    fn playing_video(&self) -> String {
        self.mgr
            .playing()
            .map(|(_, b)| b.video_name())
            .unwrap_or_default()
    }

    fn run_to_end(&mut self) {
        for _ in 0..64 {
            if !self.mgr.is_running() {
                return;
            }
            self.finish_current();
        }
        panic!("session did not end");
    }

    fn stage_order(&self) -> Vec<StageKind> {
        self.mgr.history().iter().map(|r| r.stage).collect()
    }

    fn washouts(&self) -> Vec<Duration> {
        self.mgr
            .history()
            .iter()
            .filter(|r| r.stage == StageKind::Washout)
            .filter_map(|r| r.args.duration)
            .collect()
    }
}

fn two_blocks() -> Vec<Block> {
    vec![
        Block::new("/stimuli/a.mp4", Duration::from_millis(2000)).with_configuration("/q/a.toml"),
        Block::new("/stimuli/b.mp4", Duration::ZERO).with_configuration("/q/b.toml"),
    ]
}

use StageKind::{Finish, Instructions, Questionnaire, Video, Washout};

fn flat_output(dir: &Path) -> Option<OutputNaming> {
    Some(OutputNaming {
        dir: dir.to_path_buf(),
        prefix: "S01_1".into(),
        format: OutputFormat::Flat,
    })
}

fn columnar_output(dir: &Path) -> Option<OutputNaming> {
    Some(OutputNaming {
        dir: dir.to_path_buf(),
        prefix: "S01_1".into(),
        format: OutputFormat::Columnar,
    })
}

fn written_path(rig: &Rig) -> PathBuf {
    rig.mgr
        .log()
        .output()
        .map(|o| o.path().to_path_buf())
        .expect("log output attached")
}

#[test]
fn two_block_session_runs_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let plan = SessionPlan {
        output: flat_output(dir.path()),
        ..SessionPlan::default()
    };
    let mut rig = Rig::with_plan(plan);
    rig.mgr.load(two_blocks());
    rig.mgr.start().unwrap();
    rig.run_to_end();
    let path = written_path(&rig);
    assert!(path.starts_with(dir.path()));

    assert_eq!(
        rig.stage_order(),
        [
            Instructions,
            Washout,
            Video,
            Questionnaire,
            Washout,
            Video,
            Questionnaire,
            Washout,
            Finish
        ]
    );
    assert_eq!(
        rig.washouts(),
        [Duration::from_millis(2000), Duration::ZERO, Duration::ZERO]
    );
    assert_eq!(rig.mgr.state(), SessionState::Finished);
    assert_eq!(rig.mgr.log().count_of("Finished"), 1);
    assert_eq!(rig.mgr.queue().completed().len(), 2);
    assert!(rig.mgr.queue().is_consistent());

    let videos: Vec<_> = rig
        .mgr
        .history()
        .iter()
        .filter(|r| r.stage == Video)
        .filter_map(|r| r.args.path.clone())
        .collect();
    assert_eq!(
        videos,
        [PathBuf::from("/stimuli/a.mp4"), PathBuf::from("/stimuli/b.mp4")]
    );

    let rows = parse_flat(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(rows.len(), rig.mgr.log().len());
    assert_eq!(rows.first().and_then(|r| r.kind()), Some("TimeSet"));
    assert_eq!(rows.last().and_then(|r| r.kind()), Some("Finished"));
}

#[test]
fn deltas_track_the_session_clock() {
    let mut rig = Rig::with_plan(SessionPlan::default());
    rig.mgr.load(two_blocks());
    rig.mgr.start().unwrap();
    rig.run_to_end();

    let records = rig.mgr.log().records();
    assert!(records.windows(2).all(|w| w[1].delta_us >= w[0].delta_us));
    let washout = records
        .iter()
        .find(|r| r.kind == "Washout_Finished")
        .unwrap();
    assert_eq!(washout.delta_us, 2_000_000);
    assert_eq!(
        washout.fields.get("Duration"),
        Some(&FieldValue::Float(2.0))
    );
}

#[test]
fn skip_mid_video_moves_to_the_next_block() {
    let mut rig = Rig::with_plan(SessionPlan::default());
    rig.mgr.load(two_blocks());
    rig.mgr.start().unwrap();
    rig.finish_current(); // instructions
    rig.finish_current(); // washout
    assert_eq!(rig.current(), Some(Video));

    assert!(rig.mgr.skip_action().unwrap());
    assert_eq!(rig.slot(Video).halts, 1);
    assert_eq!(rig.mgr.log().count_of("Skip"), 1);
    let skip = rig.mgr.log().records().last().unwrap();
    assert_eq!(skip.kind, "Skip");
    assert_eq!(skip.fields.get("Video").and_then(|v| v.as_str()), Some("a.mp4"));

    rig.run_to_end();
    assert_eq!(
        rig.stage_order(),
        [
            Instructions,
            Washout,
            Video,
            Washout,
            Video,
            Questionnaire,
            Washout,
            Finish
        ]
    );
    assert_eq!(rig.mgr.log().count_of("Finished"), 1);
    assert_eq!(rig.mgr.log().count_of("Skip"), 1);
}

#[test]
fn skip_outside_a_block_does_nothing() {
    let mut rig = Rig::with_plan(SessionPlan::default());
    rig.mgr.load(two_blocks());
    rig.mgr.start().unwrap();
    assert!(!rig.mgr.skip_action().unwrap());
    assert_eq!(rig.current(), Some(Instructions));
}

#[test]
fn empty_block_list_goes_straight_to_trailing_stages() {
    let mut rig = Rig::with_plan(SessionPlan::default());
    rig.mgr.load(Vec::new());
    rig.mgr.start().unwrap();
    rig.run_to_end();
    assert_eq!(rig.stage_order(), [Instructions, Washout, Finish]);
    assert_eq!(rig.washouts(), [Duration::ZERO]);
    assert_eq!(rig.mgr.log().count_of("Finished"), 1);
}

#[test]
fn no_leading_stages_starts_with_the_first_block() {
    let mut plan = SessionPlan::default();
    plan.layout.before.clear();
    let mut rig = Rig::with_plan(plan);
    rig.mgr.load(two_blocks());
    rig.mgr.start().unwrap();
    assert_eq!(rig.current(), Some(Washout));
    assert_eq!(rig.mgr.queue().playing().map(|id| id.0), Some(0));
    rig.run_to_end();
    assert_eq!(rig.stage_order().len(), 8);
}

#[test]
fn washout_policy_from_base() {
    let plan = SessionPlan {
        washout: WashoutPolicy::FromBase {
            base: Duration::from_secs(5),
        },
        ..SessionPlan::default()
    };
    let mut rig = Rig::with_plan(plan);
    rig.mgr.load(two_blocks());
    rig.mgr.start().unwrap();
    rig.run_to_end();
    assert_eq!(
        rig.washouts(),
        [
            Duration::from_secs(3),
            Duration::from_secs(5),
            Duration::from_secs(5)
        ]
    );
}

#[test]
fn closing_washout_override() {
    let plan = SessionPlan {
        closing_washout: Some(Duration::from_secs(9)),
        ..SessionPlan::default()
    };
    let mut rig = Rig::with_plan(plan);
    rig.mgr.load(two_blocks());
    rig.mgr.start().unwrap();
    rig.run_to_end();
    assert_eq!(rig.washouts().last(), Some(&Duration::from_secs(9)));
}

#[test]
fn manual_stop_persists_partial_record() {
    let dir = tempfile::tempdir().unwrap();
    let plan = SessionPlan {
        output: flat_output(dir.path()),
        ..SessionPlan::default()
    };
    let mut rig = Rig::with_plan(plan);
    rig.mgr.load(two_blocks());
    rig.mgr.start().unwrap();
    rig.finish_current();
    rig.finish_current();
    assert_eq!(rig.current(), Some(Video));

    assert!(rig.mgr.stop().unwrap());
    assert_eq!(rig.mgr.state(), SessionState::Stopped);
    assert_eq!(rig.slot(Video).halts, 1);
    assert!(rig.mgr.sequencer().is_empty());
    assert_eq!(rig.mgr.queue().queued_len(), 2);
    assert_eq!(rig.mgr.log().count_of("Finished"), 0);

    let path = written_path(&rig);
    let rows = parse_flat(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(rows.last().and_then(|r| r.kind()), Some("ManualStop"));

    // The record survives until an explicit reset.
    assert!(!rig.mgr.log().is_empty());
    rig.mgr.reset().unwrap();
    assert!(rig.mgr.log().is_empty());
}

#[test]
fn restart_after_stop_begins_a_fresh_record() {
    let mut rig = Rig::with_plan(SessionPlan::default());
    rig.mgr.load(two_blocks());
    rig.mgr.start().unwrap();
    rig.finish_current();
    rig.mgr.stop().unwrap();
    rig.mgr.start().unwrap();
    assert_eq!(rig.mgr.log().count_of("TimeSet"), 1);
    assert_eq!(rig.mgr.log().count_of("ManualStop"), 0);
    rig.run_to_end();
    assert_eq!(rig.mgr.log().count_of("Finished"), 1);
}

#[test]
fn restart_keeps_the_stopped_session_file() {
    let dir = tempfile::tempdir().unwrap();
    let plan = SessionPlan {
        output: flat_output(dir.path()),
        ..SessionPlan::default()
    };
    let mut rig = Rig::with_plan(plan);
    rig.mgr.load(two_blocks());
    rig.mgr.start().unwrap();
    rig.finish_current();
    rig.mgr.stop().unwrap();
    let stopped = written_path(&rig);

    rig.mgr.reset().unwrap();
    rig.mgr.start().unwrap();
    rig.run_to_end();
    let finished = written_path(&rig);
    assert_ne!(stopped, finished);

    let kinds = |path: &Path| -> Vec<String> {
        parse_flat(&std::fs::read_to_string(path).unwrap())
            .unwrap()
            .iter()
            .filter_map(|r| r.kind().map(str::to_string))
            .collect()
    };
    assert_eq!(kinds(&stopped).last().map(String::as_str), Some("ManualStop"));
    assert_eq!(kinds(&finished).last().map(String::as_str), Some("Finished"));
    assert!(!kinds(&finished).iter().any(|k| k == "ManualStop"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
}

#[test]
fn trigger_stages_emit_once_per_completion() {
    let clock = ManualClock::default();
    let probe = DryRunOutput::new();
    let trigger = TriggerSettings::default().build(Box::new(probe.clone()));
    let plan = SessionPlan {
        trigger_on: vec![Video],
        ..SessionPlan::default()
    };
    let mut rig = Rig::new(plan, EventLog::with_trigger(clock.clone(), trigger), clock);
    rig.mgr.load(two_blocks());
    rig.mgr.start().unwrap();
    rig.run_to_end();

    assert_eq!(probe.emitted(), 2);
    assert_eq!(rig.mgr.log().count_of("Trigger"), 2);
    let trigger = rig
        .mgr
        .log()
        .records()
        .iter()
        .find(|r| r.kind == "Trigger")
        .unwrap();
    assert_eq!(
        trigger.fields.get("SubType").and_then(|v| v.as_str()),
        Some("Video_Finished")
    );
    assert_eq!(trigger.fields.get("Video").and_then(|v| v.as_str()), Some("a.mp4"));
}

#[test]
fn degraded_trigger_keeps_the_session_going() {
    let plan = SessionPlan {
        trigger_on: vec![Washout],
        ..SessionPlan::default()
    };
    let mut rig = Rig::with_plan(plan);
    rig.mgr.load(two_blocks());
    rig.mgr.start().unwrap();
    rig.run_to_end();
    assert_eq!(rig.mgr.state(), SessionState::Finished);
    // Two block washouts and the closing one.
    assert_eq!(rig.mgr.log().trigger().stats().degraded, 3);
    assert_eq!(rig.mgr.log().count_of("Trigger"), 3);
}

struct MissingVideo;

impl Presenter for MissingVideo {
    fn run(&mut self, args: &StageArgs, _done: Completion) -> Result<(), PresentError> {
        Err(PresentError::MissingResource(args.path.clone().unwrap_or_default()))
    }
}

#[test]
fn unreadable_resource_fails_the_session() {
    let mut rig = Rig::with_plan(SessionPlan::default());
    rig.mgr.stages_mut().register(Video, Box::new(MissingVideo));
    rig.mgr.load(two_blocks());
    rig.mgr.start().unwrap();
    rig.finish_current();

    let done = rig.slot(Washout).done.clone().unwrap();
    done.timeout(EventDraft::new("Washout_Finished"));
    let err = rig.mgr.drain().unwrap_err();
    assert!(matches!(
        err,
        SessionError::Stage {
            stage: StageKind::Video,
            source: PresentError::MissingResource(_),
            ..
        }
    ));
    assert_eq!(rig.mgr.state(), SessionState::Failed);
    let failed = rig.mgr.log().records().last().unwrap();
    assert_eq!(failed.kind, "StageFailed");
    assert_eq!(failed.fields.get("Stage").and_then(|v| v.as_str()), Some("video"));
}

#[test]
fn log_failure_ends_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let plan = SessionPlan {
        output: columnar_output(dir.path()),
        ..SessionPlan::default()
    };
    let mut rig = Rig::with_plan(plan);
    rig.mgr.load(two_blocks());
    rig.mgr.start().unwrap();
    assert_eq!(rig.current(), Some(Instructions));

    rusqlite::Connection::open(written_path(&rig))
        .unwrap()
        .execute_batch("DROP TABLE Event")
        .unwrap();
    let done = rig.slot(Instructions).done.clone().unwrap();
    done.ok(EventDraft::new("Instructions").with("Accepted", true));
    let err = rig.mgr.drain().unwrap_err();

    assert!(matches!(err, SessionError::Log(_)));
    assert_eq!(rig.mgr.state(), SessionState::Failed);
    assert!(!rig.mgr.is_running());
    assert_eq!(rig.mgr.active_stage(), None);
    assert_eq!(rig.mgr.log().count_of("Instructions"), 1);
}

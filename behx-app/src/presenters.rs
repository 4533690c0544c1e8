//! Stand-in presenters for the host window.
//!
//! Each presenter is a cheap handle over shared state: one clone is
//! registered with the session manager, the other stays with the host so key
//! presses and timer deadlines can reach whichever stage is on screen.

use behx_core::{Completion, EventDraft, PresentError, Presenter, StageArgs, StageKind};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};
use winit::keyboard::KeyCode;

const INSTRUCTIONS: &str = "Watch each clip, then answer the questions that follow. Press Enter to begin.";

/// What the window shows for a stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Screen {
    pub caption: String,
    pub background: [u8; 3],
}

impl Screen {
    fn new(caption: impl Into<String>, background: [u8; 3]) -> Self {
        Self {
            caption: caption.into(),
            background,
        }
    }
}

/// Host-side face of a presenter.
pub trait HostStage {
    fn screen(&self) -> Screen;

    /// Returns true when the key was consumed.
    fn key(&mut self, _key: KeyCode) -> bool {
        false
    }

    fn deadline(&self) -> Option<Instant> {
        None
    }

    fn tick(&mut self, _now: Instant) {}
}

fn digit(key: KeyCode) -> Option<usize> {
    let n = match key {
        KeyCode::Digit1 | KeyCode::Numpad1 => 1,
        KeyCode::Digit2 | KeyCode::Numpad2 => 2,
        KeyCode::Digit3 | KeyCode::Numpad3 => 3,
        KeyCode::Digit4 | KeyCode::Numpad4 => 4,
        KeyCode::Digit5 | KeyCode::Numpad5 => 5,
        KeyCode::Digit6 | KeyCode::Numpad6 => 6,
        KeyCode::Digit7 | KeyCode::Numpad7 => 7,
        KeyCode::Digit8 | KeyCode::Numpad8 => 8,
        KeyCode::Digit9 | KeyCode::Numpad9 => 9,
        _ => return None,
    };
    Some(n - 1)
}

fn is_confirm(key: KeyCode) -> bool {
    matches!(key, KeyCode::Enter | KeyCode::NumpadEnter | KeyCode::Space)
}

fn read_text(path: &Path) -> Result<String, PresentError> {
    if !path.is_file() {
        return Err(PresentError::MissingResource(path.to_path_buf()));
    }
    std::fs::read_to_string(path).map_err(|e| PresentError::Unreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn read_toml<T: DeserializeOwned>(path: Option<&PathBuf>) -> Result<T, PresentError> {
    let path = path.ok_or_else(|| PresentError::MissingResource(PathBuf::from("<no configuration>")))?;
    let text = read_text(path)?;
    toml::from_str(&text).map_err(|e| PresentError::Unreadable {
        path: path.clone(),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------

#[derive(Default)]
struct InstructionsState {
    text: String,
    done: Option<Completion>,
}

#[derive(Clone, Default)]
pub struct Instructions(Rc<RefCell<InstructionsState>>);

impl Presenter for Instructions {
    fn run(&mut self, args: &StageArgs, done: Completion) -> Result<(), PresentError> {
        let text = match &args.path {
            Some(path) => read_text(path)?,
            None => args.text.clone().unwrap_or_else(|| INSTRUCTIONS.to_string()),
        };
        let mut state = self.0.borrow_mut();
        state.text = text;
        state.done = Some(done);
        Ok(())
    }

    fn halt(&mut self) {
        self.0.borrow_mut().done = None;
    }
}

impl HostStage for Instructions {
    fn screen(&self) -> Screen {
        let state = self.0.borrow();
        let line = state.text.lines().next().unwrap_or_default();
        Screen::new(line, [32, 32, 32])
    }

    fn key(&mut self, key: KeyCode) -> bool {
        let Some(done) = self.0.borrow_mut().done.take() else {
            return false;
        };
        let event = |accepted: bool| EventDraft::new("Instructions").with("Accepted", accepted);
        match key {
            k if is_confirm(k) => done.ok(event(true)),
            KeyCode::Backspace => done.back(event(false)),
            _ => {
                self.0.borrow_mut().done = Some(done);
                return false;
            }
        };
        true
    }
}

// ---------------------------------------------------------------------------

#[derive(Default)]
struct WashoutState {
    duration: Duration,
    deadline: Option<Instant>,
    done: Option<Completion>,
}

#[derive(Clone, Default)]
pub struct Washout(Rc<RefCell<WashoutState>>);

impl Presenter for Washout {
    fn run(&mut self, args: &StageArgs, done: Completion) -> Result<(), PresentError> {
        let duration = args.duration.unwrap_or_default();
        let mut state = self.0.borrow_mut();
        state.duration = duration;
        state.deadline = Some(Instant::now() + duration);
        state.done = Some(done);
        Ok(())
    }

    fn halt(&mut self) {
        let mut state = self.0.borrow_mut();
        state.deadline = None;
        state.done = None;
    }
}

impl HostStage for Washout {
    fn screen(&self) -> Screen {
        Screen::new("", [224, 224, 224])
    }

    fn deadline(&self) -> Option<Instant> {
        self.0.borrow().deadline
    }

    fn tick(&mut self, now: Instant) {
        let mut state = self.0.borrow_mut();
        if state.deadline.is_some_and(|d| now >= d) {
            state.deadline = None;
            if let Some(done) = state.done.take() {
                done.timeout(
                    EventDraft::new("Washout_Finished")
                        .with("Duration", state.duration.as_secs_f64()),
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------

#[derive(Default)]
struct VideoState {
    name: String,
    deadline: Option<Instant>,
    done: Option<Completion>,
}

/// Placeholder playback: verifies the clip exists, then "plays" it for a
/// fixed time.
#[derive(Clone)]
pub struct Video {
    state: Rc<RefCell<VideoState>>,
    playback: Duration,
}

impl Video {
    pub fn new(playback: Duration) -> Self {
        Self {
            state: Rc::default(),
            playback,
        }
    }

    fn end(&self) -> bool {
        let mut state = self.state.borrow_mut();
        state.deadline = None;
        match state.done.take() {
            Some(done) => done.finish(EventDraft::new("Video_Finished").with("Video", state.name.as_str())),
            None => false,
        }
    }
}

impl Presenter for Video {
    fn run(&mut self, args: &StageArgs, done: Completion) -> Result<(), PresentError> {
        let path = args
            .path
            .as_ref()
            .ok_or_else(|| PresentError::MissingResource(PathBuf::from("<no video>")))?;
        if !path.is_file() {
            return Err(PresentError::MissingResource(path.clone()));
        }
        let mut state = self.state.borrow_mut();
        state.name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        state.deadline = Some(Instant::now() + self.playback);
        state.done = Some(done);
        tracing::debug!(video = %state.name, "playback started");
        Ok(())
    }

    fn halt(&mut self) {
        let mut state = self.state.borrow_mut();
        if state.done.take().is_some() {
            tracing::debug!(video = %state.name, "playback halted");
        }
        state.deadline = None;
    }
}

impl HostStage for Video {
    fn screen(&self) -> Screen {
        Screen::new(format!("Playing {}", self.state.borrow().name), [0, 0, 0])
    }

    fn key(&mut self, key: KeyCode) -> bool {
        is_confirm(key) && self.end()
    }

    fn deadline(&self) -> Option<Instant> {
        self.state.borrow().deadline
    }

    fn tick(&mut self, now: Instant) {
        let due = self.state.borrow().deadline.is_some_and(|d| now >= d);
        if due {
            self.end();
        }
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct Question {
    question: String,
    answers: Vec<String>,
    #[serde(default)]
    color: Option<[u8; 3]>,
}

#[derive(Debug, Deserialize)]
struct QuestionFile {
    #[serde(rename = "Questions", default)]
    questions: Vec<Question>,
}

#[derive(Default)]
struct QuestionnaireState {
    questions: Vec<Question>,
    current: usize,
    selected: Option<usize>,
    done: Option<Completion>,
}

/// Multiple-choice questions read from a block's configuration file.
#[derive(Clone, Default)]
pub struct Questionnaire(Rc<RefCell<QuestionnaireState>>);

impl Presenter for Questionnaire {
    fn run(&mut self, args: &StageArgs, done: Completion) -> Result<(), PresentError> {
        let file: QuestionFile = read_toml(args.path.as_ref())?;
        let empty = file.questions.is_empty();
        {
            let mut state = self.0.borrow_mut();
            state.questions = file.questions;
            state.current = 0;
            state.selected = None;
            state.done = Some(done.clone());
        }
        if empty {
            self.0.borrow_mut().done = None;
            done.finish(EventDraft::new("Questionnaire_AnswerConfirmed"));
        }
        Ok(())
    }

    fn halt(&mut self) {
        self.0.borrow_mut().done = None;
    }
}

impl HostStage for Questionnaire {
    fn screen(&self) -> Screen {
        let state = self.0.borrow();
        match state.questions.get(state.current) {
            Some(q) => {
                let answers: Vec<String> = q
                    .answers
                    .iter()
                    .enumerate()
                    .map(|(i, a)| {
                        let mark = if state.selected == Some(i) { "*" } else { "" };
                        format!("{}{mark}) {a}", i + 1)
                    })
                    .collect();
                Screen::new(
                    format!("{}  {}", q.question, answers.join("  ")),
                    q.color.unwrap_or([48, 48, 64]),
                )
            }
            None => Screen::new("", [48, 48, 64]),
        }
    }

    fn key(&mut self, key: KeyCode) -> bool {
        let mut state = self.0.borrow_mut();
        let Some(done) = state.done.clone() else {
            return false;
        };
        let Some(question) = state.questions.get(state.current).cloned() else {
            return false;
        };
        if let Some(i) = digit(key).filter(|i| *i < question.answers.len()) {
            state.selected = Some(i);
            done.answer(
                EventDraft::new("Questionnaire_AnswerSelected")
                    .with("Question", question.question.as_str())
                    .with("Answer", question.answers[i].as_str())
                    .with("AnswerIndex", i),
            );
            return true;
        }
        if !is_confirm(key) {
            return false;
        }
        let Some(i) = state.selected else {
            return true;
        };
        let event = EventDraft::new("Questionnaire_AnswerConfirmed")
            .with("Question", question.question.as_str())
            .with("Answer", question.answers[i].as_str())
            .with("AnswerIndex", i);
        state.selected = None;
        state.current += 1;
        if state.current < state.questions.len() {
            done.next(event);
        } else {
            state.done = None;
            done.finish(event);
        }
        true
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct RatingScale {
    items: Vec<String>,
    ratings: Vec<String>,
    #[serde(default)]
    color: Option<[u8; 3]>,
}

#[derive(Debug, Deserialize)]
struct RatingFile {
    #[serde(rename = "Ratings", default)]
    ratings: Vec<RatingScale>,
}

#[derive(Default)]
struct RatingState {
    items: Vec<(String, Vec<String>, Option<[u8; 3]>)>,
    current: usize,
    selected: Option<usize>,
    done: Option<Completion>,
}

/// Rates each listed item on its scale, one item per screen.
#[derive(Clone, Default)]
pub struct Rating(Rc<RefCell<RatingState>>);

impl Presenter for Rating {
    fn run(&mut self, args: &StageArgs, done: Completion) -> Result<(), PresentError> {
        let file: RatingFile = read_toml(args.path.as_ref())?;
        let items: Vec<_> = file
            .ratings
            .into_iter()
            .flat_map(|scale| {
                let RatingScale {
                    items,
                    ratings,
                    color,
                } = scale;
                items
                    .into_iter()
                    .map(move |item| (item, ratings.clone(), color))
            })
            .collect();
        let empty = items.is_empty();
        {
            let mut state = self.0.borrow_mut();
            state.items = items;
            state.current = 0;
            state.selected = None;
            state.done = (!empty).then(|| done.clone());
        }
        if empty {
            done.finish(EventDraft::new("Rating_AnswerConfirmed"));
        }
        Ok(())
    }

    fn halt(&mut self) {
        self.0.borrow_mut().done = None;
    }
}

impl HostStage for Rating {
    fn screen(&self) -> Screen {
        let state = self.0.borrow();
        match state.items.get(state.current) {
            Some((item, scale, color)) => Screen::new(
                format!("{item}: 1..{}", scale.len()),
                color.unwrap_or([64, 48, 48]),
            ),
            None => Screen::new("", [64, 48, 48]),
        }
    }

    fn key(&mut self, key: KeyCode) -> bool {
        let mut state = self.0.borrow_mut();
        let Some(done) = state.done.clone() else {
            return false;
        };
        let Some((item, scale, _)) = state.items.get(state.current).cloned() else {
            return false;
        };
        if let Some(i) = digit(key).filter(|i| *i < scale.len()) {
            state.selected = Some(i);
            done.answer(
                EventDraft::new("Rating_AnswerSelected")
                    .with("Item", item.as_str())
                    .with("Rating", scale[i].as_str()),
            );
            return true;
        }
        if !is_confirm(key) {
            return false;
        }
        let Some(i) = state.selected.take() else {
            return true;
        };
        let event = EventDraft::new("Rating_AnswerConfirmed")
            .with("Item", item.as_str())
            .with("Rating", scale[i].as_str());
        state.current += 1;
        if state.current < state.items.len() {
            done.next(event);
        } else {
            state.done = None;
            done.finish(event);
        }
        true
    }
}

// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct Finish;

impl Presenter for Finish {
    fn run(&mut self, _args: &StageArgs, done: Completion) -> Result<(), PresentError> {
        done.finish(EventDraft::new("Finished"));
        Ok(())
    }
}

impl HostStage for Finish {
    fn screen(&self) -> Screen {
        Screen::new("Finished. Thank you!", [16, 16, 16])
    }
}

/// One presenter per stage kind: the manager's copy and the host's copy.
pub fn stand_ins(playback: Duration) -> Vec<(StageKind, Box<dyn Presenter>, Box<dyn HostStage>)> {
    fn pair<P: Presenter + HostStage + Clone + 'static>(
        kind: StageKind,
        p: P,
    ) -> (StageKind, Box<dyn Presenter>, Box<dyn HostStage>) {
        (kind, Box::new(p.clone()), Box::new(p))
    }
    vec![
        pair(StageKind::Instructions, Instructions::default()),
        pair(StageKind::Washout, Washout::default()),
        pair(StageKind::Video, Video::new(playback)),
        pair(StageKind::Questionnaire, Questionnaire::default()),
        pair(StageKind::Rating, Rating::default()),
        pair(StageKind::Finish, Finish),
    ]
}

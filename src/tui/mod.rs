/// Ratatui-based terminal dashboard for todosync.
///
/// Architecture:
///   main thread:  event loop, crossterm keyboard events, session changes
///                 (watch channel), gateway results (SyncEvent) and login
///                 results (UiEvent)
///   gateway calls: tokio::spawn, owned by the `Dashboard`, each reports
///                 back through the SyncEvent channel
///
/// Layout:
///   ┌────────────────────────────────────────────────┐
///   │  header: session + counts (1 line)             │
///   ├────────────────────────────────────────────────┤
///   │  task list (Min(0))                            │
///   ├────────────────────────────────────────────────┤
///   │  input box (3 lines, fixed)                    │
///   ├────────────────────────────────────────────────┤
///   │  status bar: last notice or key hints          │
///   └────────────────────────────────────────────────┘
pub mod render;

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures_util::StreamExt;
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::Services;
use crate::auth::{self, SignedIn};
use crate::config::ResolvedConfig;
use crate::dashboard::{Dashboard, NoticeLevel, SyncEvent};
use crate::gateway::TaskGateway;
use crate::session::Session;

// ── UiEvent: results of UI-initiated background work ────────────────────────

#[derive(Debug)]
pub enum UiEvent {
    /// Login flow finished; the error is already a user-facing message
    LoginFinished(Result<SignedIn, String>),
}

// ── Mode: which screen is active ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Session not resolved yet
    Starting,
    Tasks,
    Login,
}

// ── Login form ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginField {
    #[default]
    Identifier,
    Password,
}

#[derive(Debug, Default)]
pub struct LoginForm {
    pub identifier: String,
    pub password: String,
    pub focus: LoginField,
    pub error: Option<String>,
    pub submitting: bool,
}

impl LoginForm {
    fn focused_mut(&mut self) -> &mut String {
        match self.focus {
            LoginField::Identifier => &mut self.identifier,
            LoginField::Password => &mut self.password,
        }
    }

    fn switch_focus(&mut self) {
        self.focus = match self.focus {
            LoginField::Identifier => LoginField::Password,
            LoginField::Password => LoginField::Identifier,
        };
    }
}

// ── AppState ──────────────────────────────────────────────────────────────────

pub struct AppState<G: TaskGateway> {
    pub dashboard: Dashboard<G>,
    pub mode: Mode,
    /// New-task input, `title | description`
    pub input: String,
    /// Byte offset into `input`
    pub cursor: usize,
    /// Index into the visible task list
    pub selected: usize,
    pub login: LoginForm,
    /// Name from the last interactive login, shown in the header
    pub display_name: Option<String>,
    pub spinner_tick: u64,
    pub profile: String,
    pub endpoint: String,
}

impl<G: TaskGateway> AppState<G> {
    pub fn new(dashboard: Dashboard<G>, resolved: &ResolvedConfig) -> Self {
        Self {
            dashboard,
            mode: Mode::Starting,
            input: String::new(),
            cursor: 0,
            selected: 0,
            login: LoginForm::default(),
            display_name: None,
            spinner_tick: 0,
            profile: resolved.profile_name.clone(),
            endpoint: resolved.endpoint.clone(),
        }
    }

    /// Something is in flight that the spinner should reflect.
    pub fn is_busy(&self) -> bool {
        self.mode == Mode::Starting
            || self.login.submitting
            || self.dashboard.is_loading()
            || self.dashboard.pending_mutations() > 0
    }

    pub fn on_session(&mut self, session: Session) {
        let authenticated = session.auth().is_some();
        self.dashboard.on_session(session);
        if self.dashboard.take_login_redirect() {
            self.mode = Mode::Login;
            self.display_name = None;
            self.login.password.clear();
            self.login.submitting = false;
        } else if authenticated {
            self.mode = Mode::Tasks;
            self.login = LoginForm::default();
        }
        self.clamp_selection();
    }

    pub fn apply_sync(&mut self, ev: SyncEvent) {
        self.dashboard.apply_event(ev);
        self.clamp_selection();
    }

    pub fn clamp_selection(&mut self) {
        let len = self.dashboard.visible().len();
        self.selected = self.selected.min(len.saturating_sub(1));
    }

    fn selected_task_id(&self) -> Option<String> {
        self.dashboard.visible().get(self.selected).map(|t| t.id.clone())
    }

    fn submit_input(&mut self) {
        let (title, description) = split_input(&self.input);
        match self.dashboard.add_task(&title, description.as_deref()) {
            Ok(_) => {
                self.input.clear();
                self.cursor = 0;
                self.selected = 0;
            }
            Err(e) => self.dashboard.notify(NoticeLevel::Error, e.to_string()),
        }
    }

    fn toggle_selected(&mut self) {
        let Some(id) = self.selected_task_id() else { return };
        if let Err(e) = self.dashboard.toggle_task(&id) {
            self.dashboard.notify(NoticeLevel::Error, e.to_string());
        }
    }

    fn delete_selected(&mut self) {
        let Some(id) = self.selected_task_id() else { return };
        if let Err(e) = self.dashboard.delete_task(&id) {
            self.dashboard.notify(NoticeLevel::Error, e.to_string());
        }
        self.clamp_selection();
    }
}

/// `title | description` → (title, description). Only the first `|` splits.
pub fn split_input(input: &str) -> (String, Option<String>) {
    match input.split_once('|') {
        Some((title, description)) => {
            let description = description.trim();
            (
                title.trim().to_string(),
                (!description.is_empty()).then(|| description.to_string()),
            )
        }
        None => (input.trim().to_string(), None),
    }
}

// ── Terminal setup / teardown ─────────────────────────────────────────────────

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Ok(Terminal::new(backend)?)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) {
    let _ = disable_raw_mode();
    let _ = execute!(terminal.backend_mut(), LeaveAlternateScreen);
    let _ = terminal.show_cursor();
}

// ── Main TUI run loop ─────────────────────────────────────────────────────────

pub async fn run(resolved: ResolvedConfig, services: Services, log_path: Option<PathBuf>) -> Result<()> {
    let mut terminal = setup_terminal()?;

    // Panic hook: restore terminal before printing panic
    let orig_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        orig_hook(info);
    }));

    let result = event_loop(&mut terminal, &resolved, &services).await;

    restore_terminal(&mut terminal);
    if let Some(path) = log_path {
        println!("  log: {}", path.display());
    }
    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    resolved: &ResolvedConfig,
    services: &Services,
) -> Result<()> {
    // Channel: gateway tasks → TUI
    let (sync_tx, mut sync_rx) = mpsc::unbounded_channel::<SyncEvent>();
    // Channel: login task → TUI
    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel::<UiEvent>();

    let dashboard = Dashboard::new(services.gateway.clone(), resolved.policies, sync_tx);
    let mut state = AppState::new(dashboard, resolved);

    // Subscribe before resolving so the transition out of Pending is observed
    let mut session_rx = services.resolver.subscribe();
    {
        let resolver = services.resolver.clone();
        tokio::spawn(async move {
            resolver.resolve().await;
        });
    }

    let mut crossterm_events = EventStream::new();
    let mut ticker = tokio::time::interval(tokio::time::Duration::from_millis(120));

    terminal.draw(|f| render::draw(f, &state))?;

    loop {
        tokio::select! {
            // ── Animation tick ────────────────────────────────────────────────
            _ = ticker.tick() => {
                if state.is_busy() {
                    state.spinner_tick = state.spinner_tick.wrapping_add(1);
                    terminal.draw(|f| render::draw(f, &state))?;
                }
            }

            // ── Session transitions ───────────────────────────────────────────
            Ok(()) = session_rx.changed() => {
                let session = session_rx.borrow_and_update().clone();
                state.on_session(session);
                terminal.draw(|f| render::draw(f, &state))?;
            }

            // ── Gateway results ───────────────────────────────────────────────
            Some(ev) = sync_rx.recv() => {
                state.apply_sync(ev);
                terminal.draw(|f| render::draw(f, &state))?;
            }

            // ── Login results ─────────────────────────────────────────────────
            Some(ev) = ui_rx.recv() => {
                match ev {
                    UiEvent::LoginFinished(Ok(signed_in)) => {
                        let name = if signed_in.identity.user_name.is_empty() {
                            signed_in.identity.email.clone()
                        } else {
                            signed_in.identity.user_name.clone()
                        };
                        services.resolver.establish(signed_in.auth);
                        state.display_name = Some(name);
                    }
                    UiEvent::LoginFinished(Err(message)) => {
                        state.login.submitting = false;
                        state.login.password.clear();
                        state.login.focus = LoginField::Password;
                        state.login.error = Some(message);
                    }
                }
                terminal.draw(|f| render::draw(f, &state))?;
            }

            // ── Keyboard/resize events ────────────────────────────────────────
            Some(Ok(ev)) = crossterm_events.next() => {
                if let Event::Key(key) = ev {
                    match handle_key(key, &mut state) {
                        Action::Quit => break,
                        Action::SubmitLogin { identifier, password } => {
                            spawn_login(services, identifier, password, ui_tx.clone());
                        }
                        Action::Logout => {
                            if let Err(e) = services.resolver.logout() {
                                warn!(error = %e, "logout could not clear credential");
                                state.dashboard.notify(
                                    NoticeLevel::Error,
                                    format!("Logged out, but the stored token could not be removed: {e}"),
                                );
                            }
                        }
                        Action::None => {}
                    }
                }
                terminal.draw(|f| render::draw(f, &state))?;
            }
        }
    }

    info!("dashboard closed");
    Ok(())
}

fn spawn_login(
    services: &Services,
    identifier: String,
    password: String,
    tx: mpsc::UnboundedSender<UiEvent>,
) {
    let gateway = services.gateway.clone();
    let store = services.store.clone();
    tokio::spawn(async move {
        let result = auth::login(&*gateway, store.as_ref(), &identifier, &password)
            .await
            .map_err(|e| e.to_string());
        let _ = tx.send(UiEvent::LoginFinished(result));
    });
}

// ── Key handler ───────────────────────────────────────────────────────────────

/// What the event loop must do after a key press.
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    None,
    Quit,
    SubmitLogin { identifier: String, password: String },
    Logout,
}

pub fn handle_key<G: TaskGateway>(key: KeyEvent, state: &mut AppState<G>) -> Action {
    if key.kind == KeyEventKind::Release {
        return Action::None;
    }

    // Quit works everywhere
    match (key.modifiers, key.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('c')) | (_, KeyCode::Esc) => return Action::Quit,
        _ => {}
    }

    match state.mode {
        Mode::Starting => Action::None,
        Mode::Login => handle_login_key(key, &mut state.login),
        Mode::Tasks => handle_tasks_key(key, state),
    }
}

fn handle_login_key(key: KeyEvent, form: &mut LoginForm) -> Action {
    if form.submitting {
        return Action::None;
    }
    match (key.modifiers, key.code) {
        (_, KeyCode::Tab) | (_, KeyCode::BackTab) | (_, KeyCode::Up) | (_, KeyCode::Down) => {
            form.switch_focus();
        }
        (_, KeyCode::Enter) => {
            if form.identifier.trim().is_empty() {
                form.focus = LoginField::Identifier;
                form.error = Some("Enter your email or username".to_string());
            } else if form.password.is_empty() {
                form.focus = LoginField::Password;
            } else {
                form.submitting = true;
                form.error = None;
                return Action::SubmitLogin {
                    identifier: form.identifier.trim().to_string(),
                    password: form.password.clone(),
                };
            }
        }
        (_, KeyCode::Backspace) => {
            form.focused_mut().pop();
        }
        (KeyModifiers::CONTROL, KeyCode::Char('u')) => {
            form.focused_mut().clear();
        }
        (KeyModifiers::NONE | KeyModifiers::SHIFT, KeyCode::Char(c)) => {
            form.focused_mut().push(c);
        }
        _ => {}
    }
    Action::None
}

fn handle_tasks_key<G: TaskGateway>(key: KeyEvent, state: &mut AppState<G>) -> Action {
    match (key.modifiers, key.code) {
        // Enter: add a task from the input line
        (_, KeyCode::Enter) => {
            if !state.input.trim().is_empty() {
                state.submit_input();
            }
        }
        // Ctrl+T: toggle the selected task
        (KeyModifiers::CONTROL, KeyCode::Char('t')) => state.toggle_selected(),
        // Space on an empty input: toggle too
        (KeyModifiers::NONE, KeyCode::Char(' ')) if state.input.is_empty() => {
            state.toggle_selected();
        }
        // Ctrl+D: delete the selected task
        (KeyModifiers::CONTROL, KeyCode::Char('d')) => state.delete_selected(),
        // Delete: delete the task when there is no input to edit
        (KeyModifiers::NONE, KeyCode::Delete) => {
            if state.input.is_empty() {
                state.delete_selected();
            } else {
                input_delete_forward(&mut state.input, &mut state.cursor);
            }
        }
        // Ctrl+R: reload from the server
        (KeyModifiers::CONTROL, KeyCode::Char('r')) => {
            if let Err(e) = state.dashboard.reload() {
                state.dashboard.notify(NoticeLevel::Error, e.to_string());
            }
        }
        // Ctrl+L: log out
        (KeyModifiers::CONTROL, KeyCode::Char('l')) => return Action::Logout,
        // Selection
        (_, KeyCode::Up) => {
            state.selected = state.selected.saturating_sub(1);
        }
        (_, KeyCode::Down) => {
            state.selected += 1;
            state.clamp_selection();
        }
        (_, KeyCode::Home) if state.input.is_empty() => state.selected = 0,
        // Input editing
        (KeyModifiers::NONE, KeyCode::Backspace) => {
            input_backspace(&mut state.input, &mut state.cursor);
        }
        (KeyModifiers::CONTROL, KeyCode::Backspace) | (KeyModifiers::CONTROL, KeyCode::Char('w')) => {
            input_delete_word(&mut state.input, &mut state.cursor);
        }
        (KeyModifiers::NONE, KeyCode::Left) => {
            state.cursor = prev_char_boundary(&state.input, state.cursor);
        }
        (KeyModifiers::NONE, KeyCode::Right) => {
            state.cursor = next_char_boundary(&state.input, state.cursor);
        }
        (KeyModifiers::NONE, KeyCode::Home) | (KeyModifiers::CONTROL, KeyCode::Char('a')) => {
            state.cursor = 0;
        }
        (KeyModifiers::NONE, KeyCode::End) | (KeyModifiers::CONTROL, KeyCode::Char('e')) => {
            state.cursor = state.input.len();
        }
        (KeyModifiers::CONTROL, KeyCode::Char('u')) => {
            state.input.drain(..state.cursor);
            state.cursor = 0;
        }
        (KeyModifiers::NONE | KeyModifiers::SHIFT, KeyCode::Char(c)) => {
            state.input.insert(state.cursor, c);
            state.cursor += c.len_utf8();
        }
        _ => {}
    }
    Action::None
}

// ── Input editing helpers ─────────────────────────────────────────────────────

/// Remove the character immediately before the cursor (UTF-8 safe).
fn input_backspace(input: &mut String, cursor: &mut usize) {
    if *cursor == 0 {
        return;
    }
    let prev = prev_char_boundary(input, *cursor);
    input.drain(prev..*cursor);
    *cursor = prev;
}

/// Delete the character at the cursor position.
fn input_delete_forward(input: &mut String, cursor: &mut usize) {
    if *cursor >= input.len() {
        return;
    }
    let next = next_char_boundary(input, *cursor);
    input.drain(*cursor..next);
}

/// Delete the word immediately before the cursor.
fn input_delete_word(input: &mut String, cursor: &mut usize) {
    let bytes = input.as_bytes();
    let mut start = *cursor;
    while start > 0 && bytes[start - 1].is_ascii_whitespace() {
        start -= 1;
    }
    while start > 0 && !bytes[start - 1].is_ascii_whitespace() {
        start -= 1;
    }
    // Non-ASCII bytes are never whitespace, so `start` lands on a boundary
    input.drain(start..*cursor);
    *cursor = start;
}

fn prev_char_boundary(s: &str, pos: usize) -> usize {
    if pos == 0 {
        return 0;
    }
    let mut p = pos - 1;
    while !s.is_char_boundary(p) {
        p -= 1;
    }
    p
}

fn next_char_boundary(s: &str, pos: usize) -> usize {
    if pos >= s.len() {
        return s.len();
    }
    let mut p = pos + 1;
    while p <= s.len() && !s.is_char_boundary(p) {
        p += 1;
    }
    p.min(s.len())
}

use super::r#trait::{SupportedEnvironment, WindowContextBackend};
use crate::ctx_error;
use crate::error::Result;
use crate::events::WindowContext;
use crate::trace_if_enabled;
use tracing::{info, warn};
use wayland_client::backend::ObjectId;
use wayland_client::globals::{registry_queue_init, GlobalListContents};
use wayland_client::protocol::wl_registry;
use wayland_client::{Connection, Dispatch, EventQueue, Proxy, QueueHandle};
use wayland_protocols_wlr::foreign_toplevel::v1::client::{
    zwlr_foreign_toplevel_handle_v1::{self, ZwlrForeignToplevelHandleV1},
    zwlr_foreign_toplevel_manager_v1::{self, ZwlrForeignToplevelManagerV1},
};

pub const SUPPORTED_ENVIRONMENTS: &[SupportedEnvironment] = &[
    SupportedEnvironment::wayland("wlroots"),
    SupportedEnvironment::wayland("sway"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedToplevel<K> {
    pub key: K,
    pub title: String,
    pub app_id: String,
}

/// Окна верхнего уровня в порядке их объявления композитором
#[derive(Debug, Clone)]
pub struct ToplevelTracker<K> {
    entries: Vec<TrackedToplevel<K>>,
}

impl<K> Default for ToplevelTracker<K> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<K: PartialEq> ToplevelTracker<K> {
    pub fn announce(&mut self, key: K) {
        self.entries.push(TrackedToplevel {
            key,
            title: String::new(),
            app_id: String::new(),
        });
    }

    fn entry_mut(&mut self, key: &K) -> Option<&mut TrackedToplevel<K>> {
        self.entries.iter_mut().find(|entry| &entry.key == key)
    }

    pub fn set_title(&mut self, key: &K, title: String) {
        if let Some(entry) = self.entry_mut(key) {
            entry.title = title;
        }
    }

    pub fn set_app_id(&mut self, key: &K, app_id: String) {
        if let Some(entry) = self.entry_mut(key) {
            entry.app_id = app_id;
        }
    }

    pub fn close(&mut self, key: &K) {
        self.entries.retain(|entry| &entry.key != key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Протокол не сообщает фокус напрямую: считаем активным последнее объявленное окно
    pub fn focused(&self) -> Option<&TrackedToplevel<K>> {
        self.entries.last()
    }

    pub fn snapshot(&self) -> Result<WindowContext> {
        self.focused()
            .map(|toplevel| WindowContext::new(toplevel.app_id.clone(), toplevel.title.clone()))
            .ok_or_else(|| ctx_error!(protocol, "композитор не сообщил ни об одном окне"))
    }
}

#[derive(Default)]
struct ToplevelState {
    tracker: ToplevelTracker<ObjectId>,
    finished: bool,
}

impl Dispatch<wl_registry::WlRegistry, GlobalListContents> for ToplevelState {
    fn event(
        _: &mut Self,
        _: &wl_registry::WlRegistry,
        _: wl_registry::Event,
        _: &GlobalListContents,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<ZwlrForeignToplevelManagerV1, ()> for ToplevelState {
    fn event(
        state: &mut Self,
        _: &ZwlrForeignToplevelManagerV1,
        event: zwlr_foreign_toplevel_manager_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            zwlr_foreign_toplevel_manager_v1::Event::Toplevel { toplevel } => {
                trace_if_enabled!("wlroots: новое окно {}", toplevel.id());
                state.tracker.announce(toplevel.id());
            }
            zwlr_foreign_toplevel_manager_v1::Event::Finished => {
                state.finished = true;
            }
            _ => {}
        }
    }

    wayland_client::event_created_child!(ToplevelState, ZwlrForeignToplevelManagerV1, [
        zwlr_foreign_toplevel_manager_v1::EVT_TOPLEVEL_OPCODE => (ZwlrForeignToplevelHandleV1, ())
    ]);
}

impl Dispatch<ZwlrForeignToplevelHandleV1, ()> for ToplevelState {
    fn event(
        state: &mut Self,
        handle: &ZwlrForeignToplevelHandleV1,
        event: zwlr_foreign_toplevel_handle_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            zwlr_foreign_toplevel_handle_v1::Event::Title { title } => {
                state.tracker.set_title(&handle.id(), title);
            }
            zwlr_foreign_toplevel_handle_v1::Event::AppId { app_id } => {
                state.tracker.set_app_id(&handle.id(), app_id);
            }
            zwlr_foreign_toplevel_handle_v1::Event::Closed => {
                state.tracker.close(&handle.id());
                handle.destroy();
            }
            _ => {}
        }
    }
}

struct WaylandSession {
    _connection: Connection,
    queue: EventQueue<ToplevelState>,
    state: ToplevelState,
    _manager: ZwlrForeignToplevelManagerV1,
}

impl WaylandSession {
    fn open() -> Result<Self> {
        let connection = Connection::connect_to_env()?;
        let (globals, mut queue) = registry_queue_init::<ToplevelState>(&connection)?;
        let manager: ZwlrForeignToplevelManagerV1 = globals
            .bind(&queue.handle(), 1..=3, ())
            .map_err(|e| ctx_error!(transport, "zwlr_foreign_toplevel_manager_v1 недоступен: {}", e))?;

        // Окна становятся видны только после первого обмена с композитором
        let mut state = ToplevelState::default();
        queue.roundtrip(&mut state)?;
        info!("wlroots: подключено к Wayland, окон: {}", state.tracker.len());

        Ok(Self {
            _connection: connection,
            queue,
            state,
            _manager: manager,
        })
    }
}

/// Открытая сессия с композитором, отслеживающая окна верхнего уровня
pub trait ToplevelSource: Send {
    /// Получить накопившиеся события; ошибка означает, что сессия непригодна
    fn refresh(&mut self) -> Result<()>;

    fn snapshot(&self) -> Result<WindowContext>;
}

pub trait ToplevelOpener: Send {
    fn open(&mut self) -> Result<Box<dyn ToplevelSource>>;
}

impl ToplevelSource for WaylandSession {
    fn refresh(&mut self) -> Result<()> {
        self.queue.roundtrip(&mut self.state)?;
        if self.state.finished {
            return Err(ctx_error!(transport, "композитор завершил рассылку окон"));
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<WindowContext> {
        self.state.tracker.snapshot()
    }
}

/// Подключение к композитору из $WAYLAND_DISPLAY
pub struct EnvWaylandOpener;

impl ToplevelOpener for EnvWaylandOpener {
    fn open(&mut self) -> Result<Box<dyn ToplevelSource>> {
        Ok(Box::new(WaylandSession::open()?))
    }
}

/// Бэкенд для wlroots-композиторов на основе zwlr_foreign_toplevel_manager_v1
pub struct WlrootsBackend {
    opener: Box<dyn ToplevelOpener>,
    session: Option<Box<dyn ToplevelSource>>,
}

impl WlrootsBackend {
    pub fn new() -> Self {
        Self::with_opener(Box::new(EnvWaylandOpener))
    }

    pub fn with_opener(opener: Box<dyn ToplevelOpener>) -> Self {
        Self {
            opener,
            session: None,
        }
    }
}

impl Default for WlrootsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowContextBackend for WlrootsBackend {
    fn name(&self) -> &'static str {
        "wlroots"
    }

    fn query_once(&mut self) -> Result<WindowContext> {
        let mut session = match self.session.take() {
            Some(session) => session,
            None => self.opener.open()?,
        };

        if let Err(e) = session.refresh() {
            warn!("wlroots: ошибка Wayland, соединение будет открыто заново: {}", e);
            return Err(e);
        }

        let snapshot = session.snapshot();
        self.session = Some(session);
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn empty_tracker_is_an_error() {
        let tracker: ToplevelTracker<u32> = ToplevelTracker::default();
        assert!(tracker.is_empty());
        assert!(tracker.snapshot().is_err());
    }

    #[test]
    fn single_toplevel_maps_app_id_and_title() {
        let mut tracker = ToplevelTracker::default();
        tracker.announce(1u32);
        tracker.set_app_id(&1, "X".to_string());
        tracker.set_title(&1, "Y".to_string());

        assert_eq!(tracker.snapshot().unwrap(), WindowContext::new("X", "Y"));
    }

    #[test]
    fn last_announced_toplevel_is_reported() {
        let mut tracker = ToplevelTracker::default();
        tracker.announce(1u32);
        tracker.set_app_id(&1, "foot".to_string());
        tracker.announce(2);
        tracker.set_app_id(&2, "firefox".to_string());
        tracker.set_title(&2, "Mozilla Firefox".to_string());

        // Изменение заголовка старого окна не делает его активным
        tracker.set_title(&1, "htop".to_string());
        assert_eq!(
            tracker.snapshot().unwrap(),
            WindowContext::new("firefox", "Mozilla Firefox")
        );

        tracker.close(&2);
        assert_eq!(tracker.snapshot().unwrap(), WindowContext::new("foot", "htop"));
        assert_eq!(tracker.len(), 1);
    }

    #[derive(Default)]
    struct SessionState {
        opens: AtomicUsize,
        refresh_failures: AtomicUsize,
        tracker: Mutex<ToplevelTracker<u32>>,
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    struct FakeSession(Arc<SessionState>);

    impl ToplevelSource for FakeSession {
        fn refresh(&mut self) -> Result<()> {
            if take_failure(&self.0.refresh_failures) {
                return Err(ctx_error!(transport, "Broken pipe"));
            }
            Ok(())
        }

        fn snapshot(&self) -> Result<WindowContext> {
            self.0.tracker.lock().snapshot()
        }
    }

    struct FakeOpener(Arc<SessionState>);

    impl ToplevelOpener for FakeOpener {
        fn open(&mut self) -> Result<Box<dyn ToplevelSource>> {
            self.0.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession(self.0.clone())))
        }
    }

    fn backend_with_window() -> (WlrootsBackend, Arc<SessionState>) {
        let state = Arc::new(SessionState::default());
        {
            let mut tracker = state.tracker.lock();
            tracker.announce(1);
            tracker.set_app_id(&1, "foot".to_string());
            tracker.set_title(&1, "htop".to_string());
        }
        let backend = WlrootsBackend::with_opener(Box::new(FakeOpener(state.clone())));
        (backend, state)
    }

    #[test]
    fn failed_dispatch_drops_session_and_next_query_reopens() {
        let (mut backend, state) = backend_with_window();
        assert_eq!(backend.query_once().unwrap(), WindowContext::new("foot", "htop"));
        assert_eq!(state.opens.load(Ordering::SeqCst), 1);

        state.refresh_failures.store(1, Ordering::SeqCst);
        assert!(backend.query_once().is_err());
        assert!(backend.session.is_none());

        assert_eq!(backend.query_once().unwrap(), WindowContext::new("foot", "htop"));
        assert_eq!(state.opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_toplevel_list_keeps_session() {
        let (mut backend, state) = backend_with_window();
        backend.query_once().unwrap();

        state.tracker.lock().close(&1);
        assert!(backend.query_once().is_err());
        assert!(backend.session.is_some());
        assert_eq!(state.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn events_for_unknown_toplevels_are_ignored() {
        let mut tracker = ToplevelTracker::default();
        tracker.set_title(&7u32, "ghost".to_string());
        tracker.close(&7);
        assert!(tracker.is_empty());
    }
}

use super::r#trait::{SessionType, SupportedEnvironment, WindowContextBackend};
use crate::error::Result;
use crate::events::WindowContext;
use tracing::{debug, info, warn};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{Atom, AtomEnum, ConnectionExt, Window};
use x11rb::rust_connection::RustConnection;

pub const SUPPORTED_ENVIRONMENTS: &[SupportedEnvironment] =
    &[SupportedEnvironment::any_desktop(SessionType::X11)];

/// Маркер в WM_CLASS невидимых окон-посредников фокуса (AWT/Java)
const FOCUS_PROXY_MARKER: &str = "FocusProxy";

/// Заголовок для WM_NAME в кодировке, которую мы не декодируем (COMPOUND_TEXT и т.п.)
pub const UNDECODED_TITLE: &str = "ERR_WM_NAME_UNDECODED";

/// Значение focus для PointerRoot
const POINTER_ROOT: Window = 1;

x11rb::atom_manager! {
    pub X11Atoms: X11AtomsCookie {
        _NET_WM_NAME,
        UTF8_STRING,
    }
}

/// Минимальный доступ к дереву окон, нужный для разрешения фокуса
pub trait WindowTree {
    fn title(&self, window: Window) -> Result<Option<String>>;
    /// Пара (instance, class) из WM_CLASS
    fn class_pair(&self, window: Window) -> Result<Option<(String, String)>>;
    fn parent(&self, window: Window) -> Result<Option<Window>>;
}

/// Окно верхнего уровня, найденное после обхода посредников
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedWindow {
    pub window: Window,
    pub title: Option<String>,
    pub class_pair: Option<(String, String)>,
}

fn is_focus_proxy(title: Option<&str>, class_pair: Option<&(String, String)>) -> bool {
    let title_empty = title.map_or(true, str::is_empty);
    let class_empty = class_pair.map_or(true, |(instance, class)| {
        instance.is_empty() && class.is_empty()
    });
    if title_empty && class_empty {
        return true;
    }
    class_pair.is_some_and(|(instance, class)| {
        instance.contains(FOCUS_PROXY_MARKER) || class.contains(FOCUS_PROXY_MARKER)
    })
}

/// Подняться от окна с фокусом вверх, пропуская окна-посредники.
///
/// Некоторые тулкиты держат фокус ввода на невидимом посреднике внутри
/// настоящего окна. Обход заканчивается `None`, когда у посредника нет родителя.
pub fn resolve_actual_window<T: WindowTree + ?Sized>(
    tree: &T,
    focus: Window,
) -> Result<Option<ResolvedWindow>> {
    let mut window = focus;
    loop {
        let title = tree.title(window)?;
        let class_pair = tree.class_pair(window)?;

        if !is_focus_proxy(title.as_deref(), class_pair.as_ref()) {
            return Ok(Some(ResolvedWindow {
                window,
                title,
                class_pair,
            }));
        }

        match tree.parent(window)? {
            Some(parent) => {
                debug!("Окно 0x{:x} - посредник фокуса, переходим к родителю 0x{:x}", window, parent);
                window = parent;
            }
            None => return Ok(None),
        }
    }
}

/// Построить контекст для окна, которому X сервер отдал фокус
pub fn focused_context<T: WindowTree + ?Sized>(tree: &T, focus: Window) -> Result<WindowContext> {
    if focus == x11rb::NONE || focus == POINTER_ROOT {
        return Ok(WindowContext::empty());
    }

    let context = match resolve_actual_window(tree, focus)? {
        Some(resolved) => {
            let class = resolved
                .class_pair
                .map(|(_, class)| class)
                .unwrap_or_default();
            WindowContext::new(class, resolved.title.unwrap_or_default())
        }
        None => WindowContext::empty(),
    };
    Ok(context)
}

/// Декодировать устаревшее свойство WM_NAME по его типу
pub fn decode_legacy_name(type_: Atom, value: &[u8], utf8_string: Atom) -> String {
    if type_ == Atom::from(AtomEnum::STRING) {
        // STRING в X11 - это Latin-1
        value.iter().map(|&b| char::from(b)).collect()
    } else if type_ == utf8_string {
        String::from_utf8_lossy(value).into_owned()
    } else {
        UNDECODED_TITLE.to_string()
    }
}

fn split_wm_class(value: &[u8]) -> Option<(String, String)> {
    if value.is_empty() {
        return None;
    }
    // WM_CLASS: "instance\0class\0"
    let mut parts = value.split(|&b| b == 0);
    let instance = String::from_utf8_lossy(parts.next().unwrap_or_default()).into_owned();
    let class = String::from_utf8_lossy(parts.next().unwrap_or_default()).into_owned();
    Some((instance, class))
}

struct X11Display {
    connection: RustConnection,
    atoms: X11Atoms,
}

impl X11Display {
    fn open() -> Result<Self> {
        let (connection, screen_num) = x11rb::connect(None)?;
        let atoms = X11Atoms::new(&connection)?.reply()?;
        info!("Подключено к X серверу (экран {})", screen_num);
        Ok(Self { connection, atoms })
    }
}

impl WindowTree for X11Display {
    fn title(&self, window: Window) -> Result<Option<String>> {
        let net_name = self
            .connection
            .get_property(false, window, self.atoms._NET_WM_NAME, AtomEnum::ANY, 0, u32::MAX)?
            .reply()?;
        if net_name.type_ != x11rb::NONE {
            return Ok(Some(String::from_utf8_lossy(&net_name.value).into_owned()));
        }

        let legacy = self
            .connection
            .get_property(false, window, AtomEnum::WM_NAME, AtomEnum::ANY, 0, u32::MAX)?
            .reply()?;
        if legacy.type_ == x11rb::NONE {
            return Ok(None);
        }
        Ok(Some(decode_legacy_name(
            legacy.type_,
            &legacy.value,
            self.atoms.UTF8_STRING,
        )))
    }

    fn class_pair(&self, window: Window) -> Result<Option<(String, String)>> {
        let reply = self
            .connection
            .get_property(false, window, AtomEnum::WM_CLASS, AtomEnum::STRING, 0, 1024)?
            .reply()?;
        Ok(split_wm_class(&reply.value))
    }

    fn parent(&self, window: Window) -> Result<Option<Window>> {
        let tree = self.connection.query_tree(window)?.reply()?;
        if tree.parent == x11rb::NONE {
            Ok(None)
        } else {
            Ok(Some(tree.parent))
        }
    }
}

/// Открытое соединение с X сервером, умеющее назвать окно в фокусе
pub trait FocusSource: Send {
    fn focused(&self) -> Result<WindowContext>;
}

pub trait DisplayOpener: Send {
    fn open(&mut self) -> Result<Box<dyn FocusSource>>;
}

impl FocusSource for X11Display {
    fn focused(&self) -> Result<WindowContext> {
        let focus = self.connection.get_input_focus()?.reply()?.focus;
        focused_context(self, focus)
    }
}

/// Подключение к дисплею из $DISPLAY
pub struct EnvDisplayOpener;

impl DisplayOpener for EnvDisplayOpener {
    fn open(&mut self) -> Result<Box<dyn FocusSource>> {
        Ok(Box::new(X11Display::open()?))
    }
}

/// Бэкенд X11: соединение с дисплеем открывается лениво и сбрасывается при любой ошибке
pub struct X11Backend {
    opener: Box<dyn DisplayOpener>,
    display: Option<Box<dyn FocusSource>>,
}

impl X11Backend {
    pub fn new() -> Self {
        Self::with_opener(Box::new(EnvDisplayOpener))
    }

    pub fn with_opener(opener: Box<dyn DisplayOpener>) -> Self {
        Self {
            opener,
            display: None,
        }
    }
}

impl Default for X11Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowContextBackend for X11Backend {
    fn name(&self) -> &'static str {
        "x11"
    }

    fn query_once(&mut self) -> Result<WindowContext> {
        let display = match self.display.take() {
            Some(display) => display,
            None => self.opener.open()?,
        };

        let result = display.focused();
        match &result {
            Ok(_) => self.display = Some(display),
            Err(e) => warn!("Ошибка X11, соединение будет открыто заново: {}", e),
        }
        result
    }
}

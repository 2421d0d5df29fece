//! The GUI binding seam.
//!
//! The interpreter never talks to a toolkit directly: every `gui_*` built-in
//! forwards `(name, args, line)` to an injected [`GuiHost`]. `gui_run` pumps
//! the host for events and re-enters the interpreter synchronously with each
//! event's handler, so script callbacks run one at a time on the single
//! interpreter cursor.
//!
//! [`HeadlessHost`] is the default host: it keeps the full widget registry
//! semantics (ids, text, checked/sensitive state, containment, event-handler
//! bindings) without any toolkit behind it, and drains a synthetic event
//! queue on `gui_run`. Tests use it to exercise event dispatch end to end.

use std::collections::{HashMap, VecDeque};

use indexmap::IndexMap;
use tracing::debug;

use crate::diag::{Position, RuntimeError};
use crate::value::Value;

/// An event ready for dispatch: the script function to call and its
/// arguments.
#[derive(Debug, Clone)]
pub struct GuiEvent {
    pub handler: String,
    pub args: Vec<Value>,
}

/// Host-side GUI operations, injected into the interpreter.
pub trait GuiHost {
    /// Executes one widget operation (`gui_window`, `gui_set_text`, ...).
    fn call(&mut self, name: &str, args: &[Value], line: Position) -> Result<Value, RuntimeError>;

    /// Fetches the next event while `gui_run` is pumping, or `None` when the
    /// event loop should exit.
    fn next_event(&mut self, line: Position) -> Result<Option<GuiEvent>, RuntimeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetKind {
    Window,
    Button,
    Label,
    Entry,
    Box,
    Checkbox,
    TextView,
    Frame,
    Separator,
}

#[derive(Debug)]
pub struct Widget {
    pub kind: WidgetKind,
    pub text: String,
    pub sensitive: bool,
    pub checked: bool,
    pub children: Vec<String>,
    pub handlers: HashMap<String, String>,
}

impl Widget {
    fn new(kind: WidgetKind, text: impl Into<String>) -> Widget {
        Widget {
            kind,
            text: text.into(),
            sensitive: true,
            checked: false,
            children: Vec::new(),
            handlers: HashMap::new(),
        }
    }
}

/// The default toolkit-free host.
#[derive(Debug, Default)]
pub struct HeadlessHost {
    initialized: bool,
    widgets: IndexMap<String, Widget>,
    pending: VecDeque<(String, String)>,
    quit: bool,
}

impl HeadlessHost {
    pub fn new() -> HeadlessHost {
        HeadlessHost::default()
    }

    /// Queues a synthetic `(widget, event)` pair for the next `gui_run`.
    /// Handlers are resolved from the registry at pump time.
    pub fn queue_event(&mut self, widget: impl Into<String>, event: impl Into<String>) {
        self.pending.push_back((widget.into(), event.into()));
    }

    pub fn widget(&self, id: &str) -> Option<&Widget> {
        self.widgets.get(id)
    }

    fn auto_id(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.widgets.len())
    }

    fn insert(&mut self, id: String, widget: Widget) -> Value {
        self.widgets.insert(id.clone(), widget);
        Value::Str(id)
    }

    fn get_mut(
        &mut self,
        id: &str,
        op: &str,
        line: Position,
    ) -> Result<&mut Widget, RuntimeError> {
        self.widgets
            .get_mut(id)
            .ok_or_else(|| RuntimeError::new(format!("{}(): unknown widget '{}'", op, id), line))
    }

    /// Creates a widget whose first optional argument is its text and whose
    /// second is an explicit id.
    fn create(
        &mut self,
        kind: WidgetKind,
        prefix: &str,
        default_text: &str,
        args: &[Value],
    ) -> Value {
        let text = match args.first() {
            Some(Value::Str(s)) => s.clone(),
            _ => default_text.to_string(),
        };
        let id = match args.get(1) {
            Some(Value::Str(s)) => s.clone(),
            _ => self.auto_id(prefix),
        };
        self.insert(id, Widget::new(kind, text))
    }
}

fn string_arg(args: &[Value], index: usize, op: &str, line: Position) -> Result<String, RuntimeError> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s.clone()),
        Some(other) => Err(RuntimeError::new(
            format!("{}() argument {} must be a string, got {}", op, index + 1, other.type_name()),
            line,
        )),
        None => Err(RuntimeError::new(
            format!("{}() missing argument {}", op, index + 1),
            line,
        )),
    }
}

impl GuiHost for HeadlessHost {
    fn call(&mut self, name: &str, args: &[Value], line: Position) -> Result<Value, RuntimeError> {
        match name {
            "gui_init" => {
                self.initialized = true;
                self.quit = false;
                Ok(Value::Bool(true))
            }
            "gui_window" => {
                if !self.initialized {
                    return Err(RuntimeError::new(
                        "GUI not initialized. Call gui_init() first",
                        line,
                    ));
                }
                let title = match args.first() {
                    Some(Value::Str(s)) => s.clone(),
                    _ => "ChocoLang Window".to_string(),
                };
                let id = match args.get(3) {
                    Some(Value::Str(s)) => s.clone(),
                    _ => "main_window".to_string(),
                };
                Ok(self.insert(id, Widget::new(WidgetKind::Window, title)))
            }
            "gui_button" => {
                if !matches!(args.first(), Some(Value::Str(_))) {
                    return Err(RuntimeError::new(
                        "gui_button() requires label as first argument",
                        line,
                    ));
                }
                Ok(self.create(WidgetKind::Button, "button", "", args))
            }
            "gui_label" => Ok(self.create(WidgetKind::Label, "label", "", args)),
            "gui_entry" => Ok(self.create(WidgetKind::Entry, "entry", "", args)),
            "gui_box" => Ok(self.create(WidgetKind::Box, "box", "vertical", args)),
            "gui_checkbox" => Ok(self.create(WidgetKind::Checkbox, "checkbox", "", args)),
            "gui_textview" => Ok(self.create(WidgetKind::TextView, "textview", "", args)),
            "gui_frame" => Ok(self.create(WidgetKind::Frame, "frame", "", args)),
            "gui_separator" => {
                let id = match args.first() {
                    Some(Value::Str(s)) => s.clone(),
                    _ => self.auto_id("separator"),
                };
                Ok(self.insert(id, Widget::new(WidgetKind::Separator, "")))
            }
            "gui_add" => {
                let parent = string_arg(args, 0, "gui_add", line)?;
                let child = string_arg(args, 1, "gui_add", line)?;
                if !self.widgets.contains_key(&child) {
                    return Err(RuntimeError::new(
                        format!("gui_add(): unknown widget '{}'", child),
                        line,
                    ));
                }
                self.get_mut(&parent, "gui_add", line)?.children.push(child);
                Ok(Value::Bool(true))
            }
            "gui_set_text" => {
                let id = string_arg(args, 0, "gui_set_text", line)?;
                let text = string_arg(args, 1, "gui_set_text", line)?;
                self.get_mut(&id, "gui_set_text", line)?.text = text;
                Ok(Value::Bool(true))
            }
            "gui_get_text" => {
                let id = string_arg(args, 0, "gui_get_text", line)?;
                let widget = self.get_mut(&id, "gui_get_text", line)?;
                Ok(Value::Str(widget.text.clone()))
            }
            "gui_on" => {
                let id = string_arg(args, 0, "gui_on", line)?;
                let event = string_arg(args, 1, "gui_on", line)?;
                let handler = string_arg(args, 2, "gui_on", line)?;
                self.get_mut(&id, "gui_on", line)?
                    .handlers
                    .insert(event, handler);
                Ok(Value::Bool(true))
            }
            "gui_show" => {
                let id = string_arg(args, 0, "gui_show", line)?;
                self.get_mut(&id, "gui_show", line)?;
                Ok(Value::Bool(true))
            }
            "gui_quit" => {
                self.quit = true;
                Ok(Value::Bool(true))
            }
            "gui_set_sensitive" => {
                let id = string_arg(args, 0, "gui_set_sensitive", line)?;
                let flag = matches!(args.get(1), Some(Value::Bool(true)));
                self.get_mut(&id, "gui_set_sensitive", line)?.sensitive = flag;
                Ok(Value::Bool(true))
            }
            "gui_get_checked" => {
                let id = string_arg(args, 0, "gui_get_checked", line)?;
                let widget = self.get_mut(&id, "gui_get_checked", line)?;
                Ok(Value::Bool(widget.checked))
            }
            "gui_set_checked" => {
                let id = string_arg(args, 0, "gui_set_checked", line)?;
                let flag = matches!(args.get(1), Some(Value::Bool(true)));
                self.get_mut(&id, "gui_set_checked", line)?.checked = flag;
                Ok(Value::Bool(true))
            }
            other => Err(RuntimeError::new(
                format!("Undefined function '{}'", other),
                line,
            )),
        }
    }

    fn next_event(&mut self, _line: Position) -> Result<Option<GuiEvent>, RuntimeError> {
        while let Some((widget_id, event)) = self.pending.pop_front() {
            if self.quit {
                self.pending.clear();
                return Ok(None);
            }
            let handler = self
                .widgets
                .get(&widget_id)
                .and_then(|w| w.handlers.get(&event))
                .cloned();
            match handler {
                Some(handler) => {
                    debug!(widget = %widget_id, event = %event, handler = %handler, "dispatching event");
                    return Ok(Some(GuiEvent {
                        handler,
                        args: Vec::new(),
                    }));
                }
                // Events on widgets with no registered handler are dropped.
                None => continue,
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn str_val(s: &str) -> Value {
        Value::Str(s.to_string())
    }

    #[test]
    fn window_requires_init() {
        let mut host = HeadlessHost::new();
        let err = host.call("gui_window", &[], 1).unwrap_err();
        assert!(err.message.contains("gui_init"));

        host.call("gui_init", &[], 1).unwrap();
        let id = host.call("gui_window", &[], 2).unwrap();
        assert_eq!(id, str_val("main_window"));
    }

    #[test]
    fn buttons_get_generated_ids() {
        let mut host = HeadlessHost::new();
        let id = host.call("gui_button", &[str_val("Go")], 1).unwrap();
        assert_eq!(id, str_val("button_0"));
        let id = host.call("gui_button", &[str_val("Stop")], 1).unwrap();
        assert_eq!(id, str_val("button_1"));
    }

    #[test]
    fn button_requires_label() {
        let mut host = HeadlessHost::new();
        let err = host.call("gui_button", &[], 1).unwrap_err();
        assert!(err.message.contains("label"));
    }

    #[test]
    fn text_roundtrip() {
        let mut host = HeadlessHost::new();
        host.call("gui_label", &[str_val("hi"), str_val("l1")], 1).unwrap();
        host.call("gui_set_text", &[str_val("l1"), str_val("bye")], 2).unwrap();
        let text = host.call("gui_get_text", &[str_val("l1")], 3).unwrap();
        assert_eq!(text, str_val("bye"));
    }

    #[test]
    fn unknown_widget_errors_name_the_op() {
        let mut host = HeadlessHost::new();
        let err = host
            .call("gui_set_text", &[str_val("ghost"), str_val("x")], 4)
            .unwrap_err();
        assert_eq!(err.message, "gui_set_text(): unknown widget 'ghost'");
        assert_eq!(err.pos, 4);
    }

    #[test]
    fn events_resolve_handlers_at_pump_time() {
        let mut host = HeadlessHost::new();
        host.queue_event("b1", "clicked");
        host.call("gui_button", &[str_val("Go"), str_val("b1")], 1).unwrap();
        host.call(
            "gui_on",
            &[str_val("b1"), str_val("clicked"), str_val("on_click")],
            2,
        )
        .unwrap();

        let ev = host.next_event(3).unwrap().expect("event expected");
        assert_eq!(ev.handler, "on_click");
        assert!(host.next_event(3).unwrap().is_none());
    }

    #[test]
    fn unhandled_events_are_dropped() {
        let mut host = HeadlessHost::new();
        host.call("gui_button", &[str_val("Go"), str_val("b1")], 1).unwrap();
        host.queue_event("b1", "clicked");
        assert!(host.next_event(2).unwrap().is_none());
    }

    #[test]
    fn quit_stops_the_pump() {
        let mut host = HeadlessHost::new();
        host.call("gui_button", &[str_val("Go"), str_val("b1")], 1).unwrap();
        host.call(
            "gui_on",
            &[str_val("b1"), str_val("clicked"), str_val("on_click")],
            1,
        )
        .unwrap();
        host.call("gui_quit", &[], 1).unwrap();
        host.queue_event("b1", "clicked");
        assert!(host.next_event(2).unwrap().is_none());
    }

    #[test]
    fn containment_is_recorded() {
        let mut host = HeadlessHost::new();
        host.call("gui_init", &[], 1).unwrap();
        host.call("gui_window", &[], 1).unwrap();
        host.call("gui_box", &[str_val("vertical"), str_val("root")], 1).unwrap();
        host.call("gui_add", &[str_val("main_window"), str_val("root")], 1).unwrap();
        assert_eq!(host.widget("main_window").unwrap().children, vec!["root"]);
    }
}

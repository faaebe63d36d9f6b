//! Key bindings.

use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::core::Action;

pub fn handle_key_event(key: KeyEvent) -> Option<Action> {
    // Windows reports releases too.
    if key.kind != KeyEventKind::Press {
        return None;
    }

    match key.code {
        KeyCode::Char('q') => Some(Action::Quit),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Action::Quit),
        KeyCode::Left | KeyCode::Right | KeyCode::Tab | KeyCode::Char('h') | KeyCode::Char('l') => {
            Some(Action::ToggleFocus)
        }
        KeyCode::Enter | KeyCode::Char(' ') => Some(Action::Advance),
        KeyCode::Up | KeyCode::Char('k') => Some(Action::SelectPrevious),
        KeyCode::Down | KeyCode::Char('j') => Some(Action::SelectNext),
        _ => None,
    }
}

pub fn handle_event(event: Event) -> Option<Action> {
    match event {
        Event::Key(key) => handle_key_event(key),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState;

    fn press(code: KeyCode) -> Event {
        Event::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    #[test]
    fn test_bindings() {
        assert_eq!(handle_event(press(KeyCode::Char('q'))), Some(Action::Quit));
        assert_eq!(handle_event(press(KeyCode::Tab)), Some(Action::ToggleFocus));
        assert_eq!(handle_event(press(KeyCode::Char('h'))), Some(Action::ToggleFocus));
        assert_eq!(handle_event(press(KeyCode::Right)), Some(Action::ToggleFocus));
        assert_eq!(handle_event(press(KeyCode::Enter)), Some(Action::Advance));
        assert_eq!(handle_event(press(KeyCode::Char(' '))), Some(Action::Advance));
        assert_eq!(handle_event(press(KeyCode::Char('k'))), Some(Action::SelectPrevious));
        assert_eq!(handle_event(press(KeyCode::Down)), Some(Action::SelectNext));
        assert_eq!(handle_event(press(KeyCode::Char('x'))), None);
    }

    #[test]
    fn test_ctrl_c_quits() {
        let key = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(handle_key_event(key), Some(Action::Quit));
        assert_eq!(handle_event(press(KeyCode::Char('c'))), None);
    }

    #[test]
    fn test_release_is_ignored() {
        let key = KeyEvent {
            code: KeyCode::Enter,
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Release,
            state: KeyEventState::NONE,
        };
        assert_eq!(handle_key_event(key), None);
    }

    #[test]
    fn test_non_key_events_are_ignored() {
        assert_eq!(handle_event(Event::Resize(80, 24)), None);
        assert_eq!(handle_event(Event::FocusLost), None);
    }
}

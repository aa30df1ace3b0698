use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Events dispatched through the application channel.
#[derive(Debug, Clone)]
pub enum Action {
    /// A classified keystroke.
    Key(Keystroke),
    /// Periodic reconciliation tick.
    Tick,
    /// Terminal was resized.
    Resize,
}

/// The small keystroke vocabulary the mode machine understands, resolved
/// from raw terminal events at the edge of the event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keystroke {
    Char(char),
    Enter,
    Esc,
    Backspace,
    Up,
    Down,
    CtrlC,
}

/// Classify a raw key event; unmapped keys are dropped.
pub fn classify(key: KeyEvent) -> Option<Keystroke> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => Some(Keystroke::CtrlC),
            _ => None,
        };
    }
    match key.code {
        KeyCode::Char(c) => Some(Keystroke::Char(c)),
        KeyCode::Enter => Some(Keystroke::Enter),
        KeyCode::Esc => Some(Keystroke::Esc),
        KeyCode::Backspace | KeyCode::Delete => Some(Keystroke::Backspace),
        KeyCode::Up => Some(Keystroke::Up),
        KeyCode::Down => Some(Keystroke::Down),
        _ => None,
    }
}

use crossterm::event::{self, Event as CrosstermEvent, KeyEvent};
use qcache::{HostEvent, ManualEventSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Application events
#[derive(Debug)]
pub enum Event {
  /// Terminal key press
  Key(KeyEvent),
  /// Periodic tick for redrawing the status table
  Tick,
}

/// Event handler that produces events from terminal input and a tick timer.
///
/// Terminal focus changes are not forwarded as events; they are raised on
/// the host event source, where the lifecycle listeners pick them up.
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration, host: Arc<ManualEventSource>) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Terminal polling blocks, so keep it off the async workers
    tokio::task::spawn_blocking(move || loop {
      if event::poll(tick_rate).unwrap_or(false) {
        match event::read() {
          Ok(CrosstermEvent::Key(key)) => {
            if tx.send(Event::Key(key)).is_err() {
              break;
            }
          }
          Ok(CrosstermEvent::FocusGained) => {
            host.emit(HostEvent::Focus);
          }
          Ok(CrosstermEvent::FocusLost) => {
            host.emit(HostEvent::Hidden);
          }
          _ => {}
        }
      } else if tx.send(Event::Tick).is_err() {
        break;
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

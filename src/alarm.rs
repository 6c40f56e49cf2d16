use {
  std::{
    cmp::Ordering,
    collections::BinaryHeap,
    sync::{Arc, Condvar, Mutex},
    thread::JoinHandle,
    time::Instant,
  },
  tracing::trace,
};

struct Operation {
  wakeup: Instant,
  /// Insertion order breaks ties so equal deadlines run fifo.
  sequence: u64,
  task: Box<dyn FnOnce() + Send>,
}

impl PartialEq for Operation {
  fn eq(&self, other: &Self) -> bool {
    self.wakeup == other.wakeup && self.sequence == other.sequence
  }
}

impl Eq for Operation {}

impl PartialOrd for Operation {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for Operation {
  fn cmp(&self, other: &Self) -> Ordering {
    // reversed so the BinaryHeap surfaces the earliest deadline
    other
      .wakeup
      .cmp(&self.wakeup)
      .then(other.sequence.cmp(&self.sequence))
  }
}

#[derive(Default)]
struct AlarmState {
  queue: BinaryHeap<Operation>,
  next_sequence: u64,
  stopped: bool,
}

/// Deadline-ordered task queue behind a single worker thread. Tasks
/// are plain closures; anything touching the node captures its own
/// context and checks a stop flag first.
pub struct Alarm {
  state: Arc<(Mutex<AlarmState>, Condvar)>,
  thread: Mutex<Option<JoinHandle<()>>>,
}

impl Alarm {
  pub fn new() -> Self {
    let state = Arc::new((Mutex::new(AlarmState::default()), Condvar::new()));
    let worker = Arc::clone(&state);
    let thread = std::thread::Builder::new()
      .name("alarm".into())
      .spawn(move || run(worker))
      .expect("spawning the alarm thread");
    Self {
      state,
      thread: Mutex::new(Some(thread)),
    }
  }

  pub fn add(&self, wakeup: Instant, task: impl FnOnce() + Send + 'static) {
    let (lock, condvar) = &*self.state;
    let mut state = lock.lock().unwrap();
    if state.stopped {
      return;
    }
    let sequence = state.next_sequence;
    state.next_sequence += 1;
    state.queue.push(Operation {
      wakeup,
      sequence,
      task: Box::new(task),
    });
    condvar.notify_all();
  }

  pub fn stop(&self) {
    let (lock, condvar) = &*self.state;
    {
      let mut state = lock.lock().unwrap();
      state.stopped = true;
      state.queue.clear();
      condvar.notify_all();
    }
    if let Some(thread) = self.thread.lock().unwrap().take() {
      let _ = thread.join();
    }
  }
}

impl Default for Alarm {
  fn default() -> Self {
    Self::new()
  }
}

fn run(state: Arc<(Mutex<AlarmState>, Condvar)>) {
  let (lock, condvar) = &*state;
  let mut guard = lock.lock().unwrap();
  loop {
    if guard.stopped {
      break;
    }
    let now = Instant::now();
    match guard.queue.peek() {
      Some(operation) if operation.wakeup <= now => {
        let operation = guard.queue.pop().expect("peeked");
        drop(guard);
        trace!("alarm running operation {}", operation.sequence);
        (operation.task)();
        guard = lock.lock().unwrap();
      }
      Some(operation) => {
        let timeout = operation.wakeup - now;
        guard = condvar.wait_timeout(guard, timeout).unwrap().0;
      }
      None => {
        guard = condvar.wait(guard).unwrap();
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use {
    super::Alarm,
    std::{
      sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc,
        Arc,
      },
      time::{Duration, Instant},
    },
  };

  #[test]
  fn runs_tasks_in_deadline_order() {
    let alarm = Alarm::new();
    let (tx, rx) = mpsc::channel();

    let now = Instant::now();
    for (delay, label) in
      [(30u64, "third"), (10, "first"), (20, "second")]
    {
      let tx = tx.clone();
      alarm.add(now + Duration::from_millis(delay), move || {
        tx.send(label).unwrap();
      });
    }

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "first");
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "second");
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "third");
    alarm.stop();
  }

  #[test]
  fn stop_discards_pending_tasks() {
    let alarm = Alarm::new();
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    alarm.add(Instant::now() + Duration::from_secs(60), move || {
      counter.fetch_add(1, Ordering::SeqCst);
    });
    alarm.stop();
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    // adds after stop are ignored
    let counter = Arc::clone(&ran);
    alarm.add(Instant::now(), move || {
      counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(ran.load(Ordering::SeqCst), 0);
  }
}

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Ограничитель частоты диагностических сообщений: не больше одного
/// сообщения на ключ за `interval`.
#[derive(Debug)]
pub struct DiagnosticThrottle {
    interval: Duration,
    last_emitted: HashMap<&'static str, Instant>,
}

impl DiagnosticThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emitted: HashMap::new(),
        }
    }

    /// true, если сообщение с этим ключом можно вывести сейчас
    pub fn allow(&mut self, key: &'static str) -> bool {
        self.allow_at(key, Instant::now())
    }

    fn allow_at(&mut self, key: &'static str, now: Instant) -> bool {
        match self.last_emitted.get(key) {
            Some(last) if now.duration_since(*last) < self.interval => false,
            _ => {
                self.last_emitted.insert(key, now);
                true
            }
        }
    }

    /// Сбросить ключ после восстановления, чтобы следующая ошибка была видна сразу
    pub fn reset(&mut self, key: &'static str) {
        self.last_emitted.remove(key);
    }
}

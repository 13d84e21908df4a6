use std::{
    sync::Arc,
    thread::{self, ThreadId},
    time::{Duration, Instant},
};

use dashmap::DashMap;
use graphbus_error::{BackendError, GraphBusResult};
use parking_lot::{Condvar, Mutex};
use tracing::{error, trace};

use super::LockManager;

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
    /// Потоки, которые держат блокировку или ждут её.
    users: usize,
}

#[derive(Debug, Default)]
struct NamedLock {
    state: Mutex<LockState>,
    released: Condvar,
}

/// Именованные реентерабельные блокировки в памяти процесса.
///
/// Владелец определяется потоком: повторный захват тем же потоком
/// увеличивает глубину, остальные потоки ждут освобождения. Запись имени
/// удаляется, когда его никто не держит и не ждёт.
#[derive(Default)]
pub struct InMemoryLocks {
    locks: DashMap<String, Arc<NamedLock>>,
}

impl InMemoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Берёт запись имени и учитывает вызывающий поток как пользователя.
    fn named(
        &self,
        name: &str,
    ) -> Arc<NamedLock> {
        let entry = self.locks.entry(name.to_string()).or_default();
        entry.value().state.lock().users += 1;
        entry.value().clone()
    }

    fn forget_if_idle(
        &self,
        name: &str,
    ) {
        self.locks
            .remove_if(name, |_, lock| lock.state.lock().users == 0);
    }

    /// Количество имён, для которых сейчас хранится состояние.
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }

    /// Возвращает `true`, если блокировка сейчас кем-то удерживается.
    pub fn is_locked(
        &self,
        name: &str,
    ) -> bool {
        self.locks
            .get(name)
            .map(|lock| lock.state.lock().owner.is_some())
            .unwrap_or(false)
    }
}

impl LockManager for InMemoryLocks {
    fn acquire(
        &self,
        name: &str,
        timeout: Option<Duration>,
    ) -> GraphBusResult<()> {
        let lock = self.named(name);
        let me = thread::current().id();
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut state = lock.state.lock();
        loop {
            let owner = state.owner;
            match owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    trace!(lock = name, "lock acquired");
                    return Ok(());
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    state.users -= 1;
                    return Ok(());
                }
                Some(_) => match deadline {
                    Some(deadline) => {
                        if lock.released.wait_until(&mut state, deadline).timed_out()
                            && state.owner.is_some()
                        {
                            state.users -= 1;
                            drop(state);
                            self.forget_if_idle(name);
                            return Err(BackendError::LockTimeout {
                                resource: name.to_string(),
                                timeout_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
                            }
                            .into());
                        }
                    }
                    None => lock.released.wait(&mut state),
                },
            }
        }
    }

    fn release(
        &self,
        name: &str,
    ) -> GraphBusResult<()> {
        let Some(lock) = self.locks.get(name).map(|l| l.value().clone()) else {
            return Err(BackendError::Lock {
                resource: name.to_string(),
                reason: "lock was never acquired".to_string(),
            }
            .into());
        };

        let me = thread::current().id();
        let mut state = lock.state.lock();
        if state.owner != Some(me) {
            return Err(BackendError::Lock {
                resource: name.to_string(),
                reason: "released by a thread that does not own it".to_string(),
            }
            .into());
        }

        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            state.users -= 1;
            lock.released.notify_one();
            drop(state);
            self.forget_if_idle(name);
            trace!(lock = name, "lock released");
        }
        Ok(())
    }
}

/// RAII-guard именованной блокировки.
pub struct LockGuard {
    manager: Arc<dyn LockManager>,
    name: String,
}

impl LockGuard {
    pub fn acquire(
        manager: Arc<dyn LockManager>,
        name: &str,
        timeout: Option<Duration>,
    ) -> GraphBusResult<Self> {
        manager.acquire(name, timeout)?;
        Ok(Self {
            manager,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.manager.release(&self.name) {
            error!(lock = %self.name, error = %e, "failed to release lock");
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Barrier,
    };

    use graphbus_error::StatusCode;

    use super::*;

    /// Тест проверяет реентерабельность для владельца.
    #[test]
    fn test_reentrant_acquire() {
        let locks = InMemoryLocks::new();
        locks.acquire("a", None).unwrap();
        locks.acquire("a", None).unwrap();
        locks.release("a").unwrap();
        assert!(locks.is_locked("a"));
        locks.release("a").unwrap();
        assert!(!locks.is_locked("a"));
    }

    /// Тест проверяет, что чужой поток не может освободить блокировку.
    #[test]
    fn test_release_by_non_owner_fails() {
        let locks = Arc::new(InMemoryLocks::new());
        locks.acquire("a", None).unwrap();

        let other = locks.clone();
        let err = thread::spawn(move || other.release("a"))
            .join()
            .unwrap()
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::LockError);
    }

    #[test]
    fn test_release_unknown_lock_fails() {
        let locks = InMemoryLocks::new();
        assert!(locks.release("ghost").is_err());
    }

    /// Тест проверяет таймаут ожидания блокировки, занятой другим потоком.
    #[test]
    fn test_acquire_timeout() {
        let locks = Arc::new(InMemoryLocks::new());
        locks.acquire("busy", None).unwrap();

        let other = locks.clone();
        let err = thread::spawn(move || other.acquire("busy", Some(Duration::from_millis(20))))
            .join()
            .unwrap()
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::LockTimeout);
    }

    /// Тест проверяет, что состояние имени живёт, пока блокировку держат
    /// или ждут, и удаляется после последнего освобождения.
    #[test]
    fn test_idle_names_are_forgotten() {
        let locks = Arc::new(InMemoryLocks::new());
        for i in 0..100 {
            let name = format!("/ns/var{i}");
            locks.acquire(&name, None).unwrap();
            locks.acquire(&name, None).unwrap();
            locks.release(&name).unwrap();
            locks.release(&name).unwrap();
        }
        assert_eq!(locks.tracked(), 0);

        locks.acquire("held", None).unwrap();
        let other = locks.clone();
        let timed_out = thread::spawn(move || other.acquire("held", Some(Duration::from_millis(10))))
            .join()
            .unwrap();
        assert!(timed_out.is_err());
        assert_eq!(locks.tracked(), 1);

        let waiter = {
            let locks = locks.clone();
            thread::spawn(move || {
                locks.acquire("held", None).unwrap();
                locks.release("held").unwrap();
            })
        };
        thread::sleep(Duration::from_millis(20));
        locks.release("held").unwrap();
        waiter.join().unwrap();
        assert_eq!(locks.tracked(), 0);
    }

    /// Тест проверяет взаимное исключение read-modify-write между потоками.
    #[test]
    fn test_mutual_exclusion() {
        let locks: Arc<dyn LockManager> = Arc::new(InMemoryLocks::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let inside = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = locks.clone();
                let counter = counter.clone();
                let inside = inside.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..50 {
                        let _g = LockGuard::acquire(locks.clone(), "res", None).unwrap();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        let v = counter.load(Ordering::SeqCst);
                        counter.store(v + 1, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 200);
    }
}

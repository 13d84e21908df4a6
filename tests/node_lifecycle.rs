use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use graphbus::{
    Backend, DiscoveryGraph, Node, NodeOptions, SharedVariableDecl, SpinCondition, SpinOptions,
    StatusCode,
};

fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

fn options(node_ref: &str) -> NodeOptions {
    NodeOptions::default()
        .node_ref(node_ref)
        .spin_period(Duration::from_millis(2))
}

/// Тест проверяет, что узел без ref получает случайный ref из 8 символов.
#[test]
fn test_generated_node_ref() {
    let backend = Backend::in_memory();
    let a = Node::new(backend.clone(), NodeOptions::default()).unwrap();
    let b = Node::new(backend.clone(), NodeOptions::default()).unwrap();

    assert_eq!(a.node_ref().len(), 8);
    assert!(a.node_ref().chars().all(|c| c.is_ascii_alphanumeric()));
    assert_ne!(a.node_ref(), b.node_ref());
}

/// Адрес узла учитывает namespace.
#[test]
fn test_address_with_namespace() {
    let backend = Backend::in_memory();
    let n = Node::new(backend, options("arm").namespace("robot")).unwrap();
    assert_eq!(n.address(), "/robot/arm");
}

/// Тест проверяет полный цикл: блокирующий spin до остановки из другого
/// потока, затем повторный запуск.
#[test]
fn test_blocking_spin_stopped_from_other_thread() {
    let backend = Backend::in_memory();
    let n = Node::new(backend, options("blocker")).unwrap();

    let stopper = n.clone();
    let handle = thread::spawn(move || {
        assert!(wait_until(|| stopper.is_spinning().unwrap()));
        stopper.stop().unwrap();
    });

    n.spin(SpinOptions::default()).unwrap();
    handle.join().unwrap();
    assert!(!n.is_spinning().unwrap());

    let rounds = Arc::new(AtomicUsize::new(0));
    let counter = rounds.clone();
    n.spin(SpinOptions::default().condition(SpinCondition::predicate(move || {
        counter.fetch_add(1, Ordering::SeqCst) < 3
    })))
    .unwrap();
    assert!(rounds.load(Ordering::SeqCst) >= 4);
}

/// Второй spin того же узла отклоняется, пока первый не завершён.
#[test]
fn test_second_spin_rejected() {
    let backend = Backend::in_memory();
    let n = Node::new(backend, options("busy")).unwrap();
    n.spin(SpinOptions::default().threaded(true)).unwrap();

    let err = n
        .spin(SpinOptions::default().threaded(true))
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::AlreadySpinning);

    n.stop().unwrap();
    n.join().unwrap();
}

/// Тест проверяет, что destroy снимает узел и его endpoints с регистрации
/// и что операции над уничтоженным узлом возвращают ошибку.
#[test]
fn test_destroy_unregisters_everything() {
    let backend = Backend::in_memory();
    let n = Node::new(backend.clone(), options("doomed")).unwrap();
    n.create_publisher("/out", "str", None, None).unwrap();
    n.declare_shared_variable(SharedVariableDecl::new("level", 1), None)
        .unwrap();

    let graph = n.discovery().clone();
    assert!(graph.is_node_declared(n.address()).unwrap());

    n.destroy().unwrap();
    assert!(!n.is_declared());
    assert!(!graph.is_node_declared(n.address()).unwrap());

    let err = n.create_publisher("/out", "str", None, None).unwrap_err();
    assert_eq!(err.status_code(), StatusCode::NodeDestroyed);
    n.destroy().unwrap();
}

/// Drop последней ссылки уничтожает узел, даже если он крутится в фоне.
#[test]
fn test_drop_while_spinning() {
    let backend = Backend::in_memory();
    let n = Node::new(backend.clone(), options("dropped")).unwrap();
    let address = n.address().to_string();
    let document = n.discovery().document().to_string();
    n.spin(SpinOptions::default().threaded(true)).unwrap();
    thread::sleep(Duration::from_millis(10));

    drop(n);
    let graph = DiscoveryGraph::new(backend, &document);
    assert!(wait_until(|| !graph.is_node_declared(&address).unwrap()));
}

/// Тест проверяет асинхронные таймеры узла: запуск, замена по имени и
/// остановка при уничтожении узла.
#[test]
fn test_async_timers_follow_node() {
    let backend = Backend::in_memory();
    let n = Node::new(backend, options("ticker")).unwrap();

    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = ticks.clone();
    let timer = n
        .create_async_timer(Some("beat".to_string()), Duration::from_millis(2), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    assert!(wait_until(|| ticks.load(Ordering::SeqCst) >= 3));

    let replacement = n
        .create_async_timer(Some("beat".to_string()), Duration::from_millis(50), || Ok(()))
        .unwrap();
    assert!(timer.is_cancelled());
    assert_eq!(n.async_timers().len(), 1);

    n.destroy().unwrap();
    assert!(replacement.is_cancelled());
    assert!(!n.destroy_async_timer("beat"));
}

/// Тест проверяет, что второй узел с тем же адресом не создаётся и не
/// мешает живому узлу: тот продолжает крутиться и принимать endpoints.
#[test]
fn test_duplicate_address_rejected() {
    let backend = Backend::in_memory();
    let first = Node::new(backend.clone(), options("x")).unwrap();
    first.spin(SpinOptions::default().threaded(true)).unwrap();

    let err = Node::new(backend.clone(), options("x")).unwrap_err();
    assert_eq!(err.status_code(), StatusCode::NodeAlreadyDeclared);
    assert_eq!(err.contexts()[0].message, "register node /x");

    assert!(first.is_spinning().unwrap());
    assert!(first.discovery().is_node_declared("/x").unwrap());
    first.create_publisher("/still_alive", "str", None, None).unwrap();

    first.stop().unwrap();
    first.join().unwrap();
}

/// Тест проверяет, что endpoints узла печатаются через `Debug` со своими
/// ключевыми полями.
#[test]
fn test_endpoints_debug_output() {
    let node = Node::new(Backend::in_memory(), options("dbg")).unwrap();
    let publisher = node
        .create_publisher("/dbg_topic", "str", None, None)
        .unwrap();
    let timer = node
        .create_timer("tick", Duration::from_millis(5), || Ok(()), None)
        .unwrap();

    let publisher = format!("{publisher:?}");
    assert!(publisher.starts_with("Publisher"));
    assert!(publisher.contains("/dbg_topic"));
    let timer = format!("{timer:?}");
    assert!(timer.starts_with("Timer"));
    assert!(timer.contains("tick"));

    node.destroy().unwrap();
}

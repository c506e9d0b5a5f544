//! Unit tests for resolution, filtering and the job adapter.

use std::collections::BTreeMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use mockall::mock;
use mockall::predicate::eq;
use parking_lot::Mutex;
use rstest::{fixture, rstest};

use super::builtin::{SESSION_INITIALIZE, SESSION_REMOVE, SYSTEM_SLEEP, SYSTEM_VERSION};
use super::*;
use crate::collaborators::{CollaboratorError, ContentStore, MailMessage, Mailer};
use crate::context::ServerContext;
use crate::protocol::{CallType, Header};
use crate::registry::{Key, Registry};
use crate::request::Request;
use crate::scope::Scope;
use crate::session::{Fingerprint, HTTP_USER_AGENT, REMOTE_ADDR, Session, SessionStore};

struct Echo;

impl Command for Echo {
    fn execute(&self, call: &Call, _scope: &Scope) -> Result<Content, CommandError> {
        Ok(Content::raw(call.payload().to_vec()))
    }
}

struct Panics;

impl Command for Panics {
    fn execute(&self, _call: &Call, _scope: &Scope) -> Result<Content, CommandError> {
        panic!("command exploded");
    }
}

struct Silent;

impl Job for Silent {
    fn process(
        &self,
        _call: &Call,
        _response: &mut Response,
        _session: Option<&Arc<Session>>,
        _server: &ServerContext,
    ) -> Result<(), JobError> {
        Ok(())
    }
}

struct FailsAfterWriting;

impl Job for FailsAfterWriting {
    fn process(
        &self,
        _call: &Call,
        response: &mut Response,
        _session: Option<&Arc<Session>>,
        _server: &ServerContext,
    ) -> Result<(), JobError> {
        response.set_content(Content::text("partial"));
        Err(JobError::failed("disk full"))
    }
}

struct HangsUp;

impl Job for HangsUp {
    fn process(
        &self,
        _call: &Call,
        _response: &mut Response,
        _session: Option<&Arc<Session>>,
        _server: &ServerContext,
    ) -> Result<(), JobError> {
        Err(JobError::ConnectionLost(io::Error::from(
            io::ErrorKind::BrokenPipe,
        )))
    }
}

/// Stores the payload through the configured content store and mails its id.
struct Archive;

impl Job for Archive {
    fn process(
        &self,
        call: &Call,
        response: &mut Response,
        _session: Option<&Arc<Session>>,
        server: &ServerContext,
    ) -> Result<(), JobError> {
        let store = server
            .content_store()
            .ok_or_else(|| JobError::failed("no content store configured"))?;
        let identifier = store
            .store(&Content::raw(call.payload().to_vec()))
            .map_err(JobError::failed)?;
        if let Some(mailer) = server.mailer() {
            mailer
                .send(&MailMessage {
                    to: vec!["ops@example.com".to_owned()],
                    subject: "archived".to_owned(),
                    body: identifier.clone(),
                })
                .map_err(JobError::failed)?;
        }
        response.set_content(Content::text(identifier));
        Ok(())
    }
}

mock! {
    Store {}
    impl ContentStore for Store {
        fn store(&self, content: &Content) -> Result<String, CollaboratorError>;
        fn load(&self, identifier: &str) -> Result<Option<Content>, CollaboratorError>;
        fn remove(&self, identifier: &str) -> Result<bool, CollaboratorError>;
    }
}

mock! {
    Mail {}
    impl Mailer for Mail {
        fn send(&self, message: &MailMessage) -> Result<(), CollaboratorError>;
    }
}

/// Records its label on the way in and out.
struct Recorder {
    label: &'static str,
    trail: Arc<Mutex<Vec<String>>>,
}

impl Filter for Recorder {
    fn filter(
        &self,
        call: &Call,
        scope: &Scope,
        chain: FilterChain<'_>,
    ) -> Result<Content, CommandError> {
        self.trail.lock().push(format!("{}>", self.label));
        let outcome = chain.proceed(call, scope);
        self.trail.lock().push(format!("<{}", self.label));
        outcome
    }
}

struct Deny;

impl Filter for Deny {
    fn filter(
        &self,
        _call: &Call,
        _scope: &Scope,
        _chain: FilterChain<'_>,
    ) -> Result<Content, CommandError> {
        Err(CommandError::rejected("deny", "not allowed"))
    }
}

#[derive(Default)]
struct CallCounter {
    started: AtomicUsize,
    failed: AtomicUsize,
}

impl CallListener for CallCounter {
    fn call_started(&self, _call: &Call) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn call_finished(&self, _call: &Call, outcome: Result<&Content, &CommandError>) {
        if outcome.is_err() {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct Harness {
    registry: Registry,
    sessions: Arc<SessionStore>,
    catalog: CommandCatalog,
    aliases: BTreeMap<String, String>,
    server: Option<ServerContext>,
}

impl Harness {
    fn server(&self) -> ServerContext {
        self.server
            .clone()
            .unwrap_or_else(|| ServerContext::new(Arc::clone(&self.sessions), self.registry.clone()))
    }

    fn dispatcher(&self) -> Dispatcher {
        let aliases = AliasTable::with_registered(&self.aliases, &self.registry);
        let manager = CommandManager::new(aliases, self.catalog.clone(), self.server());
        Dispatcher::new(manager, &self.registry)
    }
}

#[fixture]
fn harness() -> Harness {
    let registry = Registry::new();
    let sessions = Arc::new(SessionStore::new(&registry));
    let mut catalog = CommandCatalog::with_builtins();
    catalog
        .register("test.echo", || Echo)
        .register("test.panics", || Panics)
        .register_job("test.silent", || Silent)
        .register_job("test.fails", || FailsAfterWriting)
        .register_job("test.hangs_up", || HangsUp)
        .register_job("test.archive", || Archive);
    Harness {
        registry,
        sessions,
        catalog,
        aliases: BTreeMap::from([
            ("@palava".to_owned(), "palava".to_owned()),
            ("@test".to_owned(), "test".to_owned()),
            ("echo".to_owned(), "test.echo".to_owned()),
        ]),
        server: None,
    }
}

fn call(name: &str, payload: &str) -> Call {
    Call::new(
        Header::new(CallType::Json, name, "", payload.len()),
        payload.as_bytes().to_vec(),
    )
}

fn dispatch(dispatcher: &Dispatcher, call: Call) -> Result<Content, CommandError> {
    dispatch_with_session(dispatcher, call, None)
}

fn dispatch_with_session(
    dispatcher: &Dispatcher,
    call: Call,
    session: Option<Arc<Session>>,
) -> Result<Content, CommandError> {
    let request = Request::from_call(&call, session);
    let mut scope = Scope::new();
    let outcome = dispatcher.execute(&mut scope, call, request);
    assert!(!scope.is_bound());
    outcome
}

#[rstest]
#[case("echo", "test.echo")]
#[case("@palava.system.version", "palava.system.version")]
#[case("@palava", "palava")]
#[case("palava.system.version", "palava.system.version")]
#[case("@unknown.thing", "@unknown.thing")]
fn alias_table_resolves_exact_names_and_prefixes(#[case] aliased: &str, #[case] expected: &str) {
    let table = AliasTable::new([("@palava", "palava"), ("echo", "test.echo")]);
    assert_eq!(table.resolve(aliased), expected);
}

#[rstest]
fn registered_alias_definitions_extend_the_table(harness: Harness) {
    harness.registry.register(
        &Key::<AliasDefinition>::of(),
        Arc::new(AliasDefinition::new("@t", "test")),
    );
    let dispatcher = harness.dispatcher();
    let content = dispatch(&dispatcher, call("@t.echo", "{}")).expect("dispatch");
    assert_eq!(content.body(), b"{}");
}

#[rstest]
fn resolved_commands_are_cached(harness: Harness) {
    let dispatcher = harness.dispatcher();
    let manager = dispatcher.commands();
    let first = manager.for_name("echo").expect("resolve");
    let second = manager.for_name("@test.echo").expect("resolve");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(manager.cached(), 1);
}

#[rstest]
fn unknown_commands_are_not_found(harness: Harness) {
    let dispatcher = harness.dispatcher();
    match dispatch(&dispatcher, call("@test.nothing", "")) {
        Err(CommandError::NotFound { name, resolved, .. }) => {
            assert_eq!(name, "@test.nothing");
            assert_eq!(resolved, "test.nothing");
        }
        other => panic!("expected not found, got {other:?}"),
    }
}

#[rstest]
fn failing_factories_are_not_found(mut harness: Harness) {
    harness.catalog.register_with("test.broken", |_: &ServerContext| {
        Err::<Echo, BoxError>("missing dependency".into())
    });
    let dispatcher = harness.dispatcher();
    let error = dispatcher
        .commands()
        .for_name("test.broken")
        .err()
        .expect("factory failure");
    assert!(matches!(error, CommandError::NotFound { source: Some(_), .. }));
}

#[rstest]
fn filters_wrap_outermost_first(harness: Harness) {
    let trail = Arc::new(Mutex::new(Vec::new()));
    let key = Key::<FilterDefinition>::of();
    for label in ["outer", "inner"] {
        harness.registry.register(
            &key,
            Arc::new(FilterDefinition::all(
                label,
                Arc::new(Recorder {
                    label,
                    trail: Arc::clone(&trail),
                }),
            )),
        );
    }
    let dispatcher = harness.dispatcher();
    dispatch(&dispatcher, call("echo", "")).expect("dispatch");
    assert_eq!(*trail.lock(), vec!["outer>", "inner>", "<inner", "<outer"]);
}

#[rstest]
fn filter_predicates_see_the_wrapped_job_type(harness: Harness) {
    harness.registry.register(
        &Key::<FilterDefinition>::of(),
        Arc::new(FilterDefinition::for_type::<Silent>("deny-silent", Arc::new(Deny))),
    );
    let dispatcher = harness.dispatcher();

    let denied = dispatch(&dispatcher, call("@test.silent", ""));
    assert!(matches!(denied, Err(CommandError::Filter { .. })));
    assert!(dispatch(&dispatcher, call("echo", "")).is_ok());

    let command = dispatcher.commands().for_name("@test.silent").expect("resolve");
    assert!(command.command_type().is::<Silent>());
    assert!(!command.command_type().is::<JobCommand<Silent>>());
}

#[rstest]
fn job_without_content_violates_the_contract(harness: Harness) {
    let dispatcher = harness.dispatcher();
    let error = dispatch(&dispatcher, call("@test.silent", "")).expect_err("no content");
    assert!(matches!(error, CommandError::NoContent { .. }));
}

#[rstest]
fn job_failure_discards_partial_content(harness: Harness) {
    let dispatcher = harness.dispatcher();
    let error = dispatch(&dispatcher, call("@test.fails", "")).expect_err("job fails");
    match error {
        CommandError::Execution { command, source } => {
            assert!(command.contains("FailsAfterWriting"), "{command}");
            assert_eq!(source.to_string(), "disk full");
        }
        other => panic!("expected execution error, got {other:?}"),
    }
}

#[rstest]
fn connection_loss_passes_through_unchanged(harness: Harness) {
    let dispatcher = harness.dispatcher();
    let error = dispatch(&dispatcher, call("@test.hangs_up", "")).expect_err("hang up");
    assert!(error.is_connection_lost());
}

#[rstest]
fn panics_propagate_and_unbind_the_scope(harness: Harness) {
    let dispatcher = harness.dispatcher();
    let mut scope = Scope::new();
    let call = call("@test.panics", "");
    let request = Request::from_call(&call, None);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        dispatcher.execute(&mut scope, call, request)
    }));
    assert!(outcome.is_err());
    assert!(!scope.is_bound());
}

#[rstest]
fn call_listeners_hear_every_dispatch(harness: Harness) {
    let counter = Arc::new(CallCounter::default());
    harness.registry.register(
        &Key::<dyn CallListener>::of(),
        Arc::clone(&counter) as Arc<dyn CallListener>,
    );
    let dispatcher = harness.dispatcher();
    dispatch(&dispatcher, call("echo", "")).expect("dispatch");
    let _ = dispatch(&dispatcher, call("missing", ""));

    assert_eq!(counter.started.load(Ordering::SeqCst), 2);
    assert_eq!(counter.failed.load(Ordering::SeqCst), 1);
}

#[rstest]
fn version_reports_the_crate_version(harness: Harness) {
    let dispatcher = harness.dispatcher();
    let content = dispatch(&dispatcher, call(SYSTEM_VERSION, "")).expect("version");
    assert_eq!(content.body(), env!("CARGO_PKG_VERSION").as_bytes());
}

#[rstest]
#[case(r#"{"msec":"1"}"#)]
#[case(r#"{"random":"2"}"#)]
#[case(r#"{"msec":"soon"}"#)]
#[case("")]
fn sleep_acknowledges(harness: Harness, #[case] payload: &str) {
    let dispatcher = harness.dispatcher();
    let content = dispatch(&dispatcher, call(SYSTEM_SLEEP, payload)).expect("sleep");
    assert_eq!(content, Content::ok());
}

fn client_payload(address: &str) -> String {
    format!(r#"{{"{REMOTE_ADDR}":"{address}","{HTTP_USER_AGENT}":"test-agent"}}"#)
}

#[rstest]
fn initialize_creates_and_then_keeps_a_session(harness: Harness) {
    let dispatcher = harness.dispatcher();
    let payload = client_payload("10.0.0.1");

    let first = dispatch(&dispatcher, call(SESSION_INITIALIZE, &payload)).expect("initialize");
    let id = String::from_utf8(first.body().to_vec()).expect("utf-8 id");
    let session = harness.sessions.get(&id).expect("session stored");
    assert_eq!(
        session.fingerprint(),
        Some(Fingerprint::new(
            Some("10.0.0.1".to_owned()),
            Some("test-agent".to_owned())
        ))
    );

    let again = dispatch_with_session(
        &dispatcher,
        call(SESSION_INITIALIZE, &payload),
        Some(Arc::clone(&session)),
    )
    .expect("initialize again");
    assert_eq!(again.body(), id.as_bytes());

    let other = dispatch_with_session(
        &dispatcher,
        call(SESSION_INITIALIZE, &client_payload("10.0.0.2")),
        Some(session),
    )
    .expect("initialize from another client");
    assert_ne!(other.body(), id.as_bytes());
    assert_eq!(harness.sessions.len(), 2);
}

#[rstest]
fn initialize_adopts_a_provisional_session_of_the_caller(harness: Harness) {
    let dispatcher = harness.dispatcher();
    let fingerprint = Fingerprint::new(Some("10.0.0.1".to_owned()), Some("test-agent".to_owned()));
    let provisional = harness
        .sessions
        .resolve(Some("stale"), &fingerprint)
        .expect("provisional session");

    let content = dispatch_with_session(
        &dispatcher,
        call(SESSION_INITIALIZE, &client_payload("10.0.0.1")),
        Some(Arc::clone(&provisional)),
    )
    .expect("initialize");

    assert_eq!(content.body(), provisional.id().as_bytes());
    assert!(!provisional.is_destroyed());
    assert!(harness.sessions.get(provisional.id()).is_some());
}

#[rstest]
fn other_commands_discard_provisional_sessions(harness: Harness) {
    let dispatcher = harness.dispatcher();
    let provisional = harness
        .sessions
        .resolve(Some("stale"), &Fingerprint::default())
        .expect("provisional session");

    dispatch_with_session(&dispatcher, call("echo", "{}"), Some(Arc::clone(&provisional)))
        .expect("echo");

    assert!(provisional.is_destroyed());
    assert!(harness.sessions.is_empty());
}

#[rstest]
fn remove_requires_a_session(harness: Harness) {
    let dispatcher = harness.dispatcher();
    let error = dispatch(&dispatcher, call(SESSION_REMOVE, r#"{"a":""}"#)).expect_err("no session");
    match error {
        CommandError::Execution { source, .. } => {
            assert_eq!(source.to_string(), JobError::MissingSession.to_string());
        }
        other => panic!("expected execution error, got {other:?}"),
    }
}

#[rstest]
fn remove_drops_named_attributes(harness: Harness) {
    let dispatcher = harness.dispatcher();
    let session = harness.sessions.create(None);
    session.set("a", "1").expect("set");
    session.set("b", "2").expect("set");

    let content = dispatch_with_session(&dispatcher, call(SESSION_REMOVE, r#"{"a":null}"#), Some(Arc::clone(&session)))
        .expect("remove");
    assert_eq!(content, Content::ok());
    assert_eq!(session.keys(), vec!["b".to_owned()]);
}

#[rstest]
fn jobs_reach_collaborators_through_the_server_context(mut harness: Harness) {
    let mut store = MockStore::new();
    store
        .expect_store()
        .withf(|content: &Content| content.body() == b"{\"doc\":1}")
        .times(1)
        .returning(|_| Ok("doc-7".to_owned()));
    let mut mailer = MockMail::new();
    mailer
        .expect_send()
        .with(eq(MailMessage {
            to: vec!["ops@example.com".to_owned()],
            subject: "archived".to_owned(),
            body: "doc-7".to_owned(),
        }))
        .times(1)
        .returning(|_| Ok(()));

    harness.server = Some(
        harness
            .server()
            .with_content_store(Arc::new(store))
            .with_mailer(Arc::new(mailer)),
    );
    let dispatcher = harness.dispatcher();
    let content = dispatch(&dispatcher, call("@test.archive", "{\"doc\":1}")).expect("archive");
    assert_eq!(content.body(), b"doc-7");
}

#[rstest]
fn collaborator_failures_become_execution_errors(mut harness: Harness) {
    let mut store = MockStore::new();
    store.expect_store().returning(|_| {
        Err(CollaboratorError::Unavailable {
            service: "content store",
            message: "offline".to_owned(),
        })
    });
    harness.server = Some(harness.server().with_content_store(Arc::new(store)));
    let dispatcher = harness.dispatcher();
    let error = dispatch(&dispatcher, call("@test.archive", "")).expect_err("store offline");
    assert!(error.to_string().contains("offline"), "{error}");
}

use crate::app::executor::RunState;
use crate::app::suspension::{CallbackParams, CoordinatorError};
use crate::app::App;
use crate::configuration::constants::common::CALLBACK_PATH;
use hyper::header::{HeaderValue, CONTENT_TYPE, LOCATION};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode, Uri};
use std::convert::Infallible;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Listens for browser redirects and hands them to the suspended runs.
pub struct CallbackServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl CallbackServer {
    pub fn start(app: Arc<App>, bind: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(bind)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let mut runtime = Runtime::new()?;
        let (shutdown, signal) = oneshot::channel::<()>();

        let worker = thread::Builder::new()
            .name("callback".to_owned())
            .spawn(move || {
                runtime.block_on(async move {
                    let make_service = make_service_fn(move |_: &AddrStream| {
                        let app = app.clone();
                        async move {
                            Ok::<_, Infallible>(service_fn(move |request| {
                                dispatch(app.clone(), request)
                            }))
                        }
                    });
                    let server = match Server::from_tcp(listener) {
                        Ok(builder) => builder.serve(make_service),
                        Err(err) => {
                            error!("Cannot listen for callbacks on {}: {}", addr, err);
                            return;
                        }
                    };
                    info!("Listening for callbacks on http://{}{}", addr, CALLBACK_PATH);
                    let graceful = server.with_graceful_shutdown(async {
                        signal.await.ok();
                    });
                    if let Err(err) = graceful.await {
                        error!("Callback listener stopped: {}", err);
                    }
                })
            })?;

        Ok(Self {
            addr,
            shutdown: Some(shutdown),
            worker: Some(worker),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.send(()).ok();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Callback listener thread panicked");
            }
        }
        debug!("Callback listener on {} stopped", self.addr);
    }
}

async fn dispatch(app: Arc<App>, request: Request<Body>) -> Result<Response<Body>, Infallible> {
    let method = request.method().clone();
    let uri = request.uri().clone();
    // Resuming executes test bodies, which block on their own requests.
    let response = match tokio::task::spawn_blocking(move || handle(&app, &method, &uri)).await {
        Ok(response) => response,
        Err(err) => respond(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Callback handling failed: {}", err),
        ),
    };
    Ok(response)
}

/// Parses `/callback/<endpoint>?<params>` and resumes the matching run.
pub fn handle(app: &App, method: &Method, uri: &Uri) -> Response<Body> {
    if *method != Method::GET {
        return respond(StatusCode::METHOD_NOT_ALLOWED, "Only GET callbacks are accepted".to_owned());
    }
    let endpoint = match uri.path().strip_prefix(CALLBACK_PATH) {
        Some(endpoint) if !endpoint.is_empty() && !endpoint.contains('/') => endpoint,
        _ => return respond(StatusCode::NOT_FOUND, format!("No callback at {}", uri.path())),
    };
    let params: CallbackParams = uri
        .query()
        .map(|query| url::form_urlencoded::parse(query.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    let run_id = params
        .get("state")
        .and_then(|state| Uuid::parse_str(state).ok());
    debug!(
        "Callback at /{} for run {:?} with {} parameter(s)",
        endpoint,
        run_id,
        params.len()
    );

    match app.deliver(run_id, endpoint, params) {
        Ok(RunState::Completed(result)) => respond(
            StatusCode::OK,
            format!(
                "Sequence '{}' finished with status {}. You may close this window.",
                result.sequence_name, result.status
            ),
        ),
        Ok(RunState::Suspended(suspension)) => match suspension.redirect_to {
            Some(url) => redirect(&url),
            None => respond(
                StatusCode::OK,
                format!(
                    "Sequence '{}' is waiting at /{}",
                    suspension.sequence_name, suspension.endpoint
                ),
            ),
        },
        Err(err) => {
            warn!("Rejected callback at /{}: {}", endpoint, err);
            respond(status_of(&err), err.to_string())
        }
    }
}

fn status_of(err: &CoordinatorError) -> StatusCode {
    if !err.is_client_error() {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    match err {
        CoordinatorError::UnknownRun(_) | CoordinatorError::NothingWaiting(_) => StatusCode::NOT_FOUND,
        CoordinatorError::AlreadyResumed(_) => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn respond(status: StatusCode, message: String) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

fn redirect(url: &str) -> Response<Body> {
    match HeaderValue::from_str(url) {
        Ok(location) => {
            let mut response = respond(StatusCode::FOUND, format!("Continue at {}", url));
            response.headers_mut().insert(LOCATION, location);
            response
        }
        Err(_) => respond(StatusCode::OK, format!("Continue at {}", url)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::executor::EngineError;
    use crate::app::sequence::{Registry, SequenceDefinition};
    use crate::app::signal::wait_at_endpoint;
    use crate::app::unit::TestDefinition;
    use crate::app::validator::StructuralValidator;
    use crate::configuration::manifest::Manifest;
    use crate::connection::testing::ScriptedClient;
    use config::FileFormat;

    fn definition(id: &str) -> TestDefinition {
        TestDefinition::builder().id(id).name(id).build().unwrap()
    }

    fn session() -> App {
        let mut registry = Registry::new();
        registry
            .register(
                SequenceDefinition::builder("Launch")
                    .id_prefix("L")
                    .suspendable()
                    .test(definition("01"), |_| {
                        wait_at_endpoint("redirect", Some("http://auth/authorize".to_owned()))
                    })
                    .test(definition("02"), |ctx| {
                        if ctx.param("again").is_some() {
                            return wait_at_endpoint("launch", Some("http://auth/again".to_owned()));
                        }
                        Ok(())
                    })
                    .test(definition("03"), |_| Ok(()))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let manifest = Manifest::parse(
            "name: callbacks\nserver: http://server/fhir\nclient:\n  id: harness\n",
            FileFormat::Yaml,
        )
        .unwrap();
        let (app, _) = App::new(
            &manifest,
            registry,
            &[],
            Arc::new(ScriptedClient::new()),
            Arc::new(StructuralValidator),
        )
        .unwrap();
        app.run();
        app
    }

    fn get(app: &App, uri: &str) -> Response<Body> {
        handle(app, &Method::GET, &uri.parse::<Uri>().unwrap())
    }

    fn waiting_run(app: &App) -> Uuid {
        app.coordinator().waiting_at("redirect").unwrap()
    }

    #[test]
    fn test_callback_completes_run_then_conflicts() {
        let app = session();
        let run_id = waiting_run(&app);

        let response = get(&app, &format!("/callback/redirect?code=abc&state={}", run_id));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(app.pending(), 0);

        let response = get(&app, &format!("/callback/redirect?code=abc&state={}", run_id));
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_callback_without_state_resumes_single_waiting_run() {
        let app = session();
        let response = get(&app, "/callback/redirect?code=abc");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_resuspended_run_redirects() {
        let app = session();
        let response = get(&app, "/callback/redirect?again=1");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(LOCATION).unwrap(),
            &HeaderValue::from_static("http://auth/again")
        );
        assert!(app.coordinator().waiting_at("launch").is_ok());
    }

    #[test]
    fn test_rejected_callbacks() {
        let app = session();
        let run_id = waiting_run(&app);

        let unknown = get(&app, &format!("/callback/redirect?state={}", Uuid::new_v4()));
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let mismatch = get(&app, &format!("/callback/launch?state={}", run_id));
        assert_eq!(mismatch.status(), StatusCode::BAD_REQUEST);

        let nothing = get(&app, "/callback/launch");
        assert_eq!(nothing.status(), StatusCode::NOT_FOUND);

        let wrong_path = get(&app, "/oauth/redirect");
        assert_eq!(wrong_path.status(), StatusCode::NOT_FOUND);

        let post = handle(&app, &Method::POST, &"/callback/redirect".parse::<Uri>().unwrap());
        assert_eq!(post.status(), StatusCode::METHOD_NOT_ALLOWED);

        assert_eq!(app.pending(), 1);
    }

    #[test]
    fn test_harness_faults_are_server_errors() {
        let engine = CoordinatorError::Engine(EngineError::CursorOutOfRange { cursor: 3, len: 2 });
        assert_eq!(status_of(&engine), StatusCode::INTERNAL_SERVER_ERROR);
        let unregistered = CoordinatorError::UnknownSequence("Gone".to_owned());
        assert_eq!(status_of(&unregistered), StatusCode::INTERNAL_SERVER_ERROR);
        let ambiguous = CoordinatorError::Ambiguous {
            endpoint: "redirect".to_owned(),
            count: 2,
        };
        assert_eq!(status_of(&ambiguous), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(&CoordinatorError::AlreadyResumed(Uuid::new_v4())), StatusCode::CONFLICT);
    }
}

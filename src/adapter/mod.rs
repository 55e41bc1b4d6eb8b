//! The debug adapter: session state machine and host-facing callbacks.
//!
//! Two threads cooperate here. The I/O thread (spawned by [`DebugAdapter::connect`])
//! reads framed requests and runs the handlers; the interpreter thread calls
//! the lifecycle callbacks and, when a stop condition fires, blocks on the
//! continue semaphore until a handler resumes it. Handlers only touch
//! adapter/manager state, never interpreter execution, so the two sides meet
//! exclusively through the shared state below.

pub mod breakpoint;
pub mod exception;
mod sync;
pub mod thread;
pub mod variables;

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::host::{FrameContext, FunctionExtent, Severity};
use crate::io::{CodecError, DapReader, DapWriter};
use crate::protocol::{
    ContinueResponseBody, DapRequest, EvaluateArguments, EvaluateResponseBody, Event,
    ExitedEventBody, InitializeArguments, InitializeResponseBody, ScopesArguments,
    ScopesResponseBody, SetBreakpointsArguments, SetExceptionBreakpointsArguments,
    StackTraceArguments, StoppedEventBody, ThreadEventBody, ThreadInfo, ThreadsResponseBody,
    VariablesArguments, VariablesResponseBody, VersionTriple,
};
use crate::tracer::FileTracer;
use crate::transport::Transport;

use self::breakpoint::BreakpointManager;
use self::exception::ExceptionManager;
use self::sync::{Semaphore, SyncEvent};
use self::thread::ThreadManager;
use self::variables::VariablesRegistry;

const SCRIPT_THREAD_NAME: &str = "Cobble script";

pub struct DebugAdapter {
    inner: Arc<AdapterInner>,
    io_thread: Option<std::thread::JoinHandle<()>>,
}

struct ThreadState {
    manager: ThreadManager,
    default_thread: Option<i64>,
}

struct AdapterInner {
    out: Arc<Mutex<DapWriter>>,
    threads: Mutex<ThreadState>,
    registry: Arc<VariablesRegistry>,
    breakpoints: BreakpointManager,
    exceptions: ExceptionManager,
    session_active: AtomicBool,
    supports_variable_type: AtomicBool,
    next_step_from: AtomicI64,
    step_in_request: AtomicBool,
    step_out_depth: AtomicI64,
    pause_request: AtomicBool,
    continue_sem: Semaphore,
    configuration_done_event: SyncEvent,
    disconnect_event: SyncEvent,
}

impl DebugAdapter {
    /// Attach to a connected client and block until it has finished
    /// configuration (`configurationDone`). On return the script thread has
    /// been announced and the interpreter may start reporting.
    pub fn connect(
        transport: Transport,
        dap_log_path: Option<&Path>,
    ) -> anyhow::Result<DebugAdapter> {
        let tracer = match dap_log_path {
            Some(path) => Some(FileTracer::create(path)?),
            None => None,
        };
        let (reader, writer) = transport.into_split();
        let reader = DapReader::new(reader, tracer.clone());
        let out = Arc::new(Mutex::new(DapWriter::new(writer, tracer)));

        let inner = Arc::new(AdapterInner {
            out: out.clone(),
            threads: Mutex::new(ThreadState {
                manager: ThreadManager::default(),
                default_thread: None,
            }),
            registry: Arc::new(VariablesRegistry::default()),
            breakpoints: BreakpointManager::new(out),
            exceptions: ExceptionManager::default(),
            session_active: AtomicBool::new(true),
            supports_variable_type: AtomicBool::new(false),
            next_step_from: AtomicI64::new(i64::MIN),
            step_in_request: AtomicBool::new(false),
            step_out_depth: AtomicI64::new(i64::MIN),
            pause_request: AtomicBool::new(false),
            continue_sem: Semaphore::default(),
            configuration_done_event: SyncEvent::default(),
            disconnect_event: SyncEvent::default(),
        });

        let io_thread = std::thread::Builder::new()
            .name("cobble-dap-io".to_string())
            .spawn({
                let inner = inner.clone();
                move || inner.run_io_loop(reader)
            })?;

        inner.configuration_done_event.wait();

        // The client may have failed or bailed out before configuring; in
        // that case the session is already inactive and the script simply
        // runs without a debuggee thread.
        if inner.session_active.load(Ordering::SeqCst) {
            let thread_id = {
                let mut threads = inner.threads.lock().unwrap();
                let id = threads
                    .manager
                    .start_thread(SCRIPT_THREAD_NAME, inner.registry.clone());
                threads.default_thread = Some(id);
                id
            };
            inner.send_event(Event::Thread(ThreadEventBody {
                reason: "started",
                thread_id,
            }));
            log::info!("DAP session configured, script thread {thread_id} started");
        }

        Ok(DebugAdapter {
            inner,
            io_thread: Some(io_thread),
        })
    }

    /// A listfile has been parsed; hand its function-line table to the
    /// breakpoint manager for deferred validation.
    pub fn source_file_loaded(&self, source_path: &str, functions: &[FunctionExtent]) {
        self.inner
            .breakpoints
            .source_file_loaded(source_path, functions);
    }

    /// The interpreter is about to execute a function at `source_path:line`.
    /// Blocks while the client holds the script stopped.
    pub fn begin_function(
        &self,
        context: Arc<dyn FrameContext>,
        source_path: &str,
        function_name: &str,
        line: i64,
    ) {
        self.inner
            .begin_function(context, source_path, function_name, line);
    }

    /// The function entered by the matching `begin_function` returned.
    pub fn end_function(&self) {
        let mut threads = self.inner.threads.lock().unwrap();
        let Some(id) = threads.default_thread else {
            return;
        };
        if let Some(thread) = threads.manager.thread_mut(id) {
            thread.pop_frame();
        }
    }

    /// The interpreter issued a diagnostic. Blocks like a breakpoint when
    /// the matching exception filter is enabled.
    pub fn check_exception(&self, severity: Severity, text: &str) {
        self.inner.check_exception(severity, text);
    }

    /// The script finished. Announces the exit to the client and blocks
    /// until it disconnects, so queued responses can drain.
    pub fn report_exit(&self, exit_code: i64) {
        self.inner.report_exit(exit_code);
    }
}

impl Drop for DebugAdapter {
    fn drop(&mut self) {
        if let Some(handle) = self.io_thread.take() {
            if let Err(err) = handle.join() {
                log::error!("DAP I/O thread panicked: {err:?}");
            }
        }
    }
}

fn parse_args<T: DeserializeOwned + Default>(arguments: &Value) -> Result<T, CodecError> {
    if arguments.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(arguments.clone())?)
}

impl AdapterInner {
    fn run_io_loop(&self, mut reader: DapReader) {
        while self.session_active.load(Ordering::SeqCst) {
            let req = match reader.read_message() {
                Ok(req) => req,
                Err(err) => {
                    // EOF after a handled disconnect is the normal shutdown.
                    if self.session_active.load(Ordering::SeqCst) {
                        self.session_error(&err.to_string());
                    }
                    break;
                }
            };
            if let Err(err) = self.handle_request(req) {
                self.session_error(&err.to_string());
                break;
            }
        }
        log::debug!("DAP I/O thread exiting");
    }

    fn handle_request(&self, req: DapRequest) -> Result<(), CodecError> {
        match req.command.as_str() {
            "initialize" => {
                let args: InitializeArguments = parse_args(&req.arguments)?;
                log::info!(
                    "initialize from client {}",
                    args.client_id.as_deref().unwrap_or("unknown")
                );
                self.supports_variable_type.store(
                    args.supports_variable_type.unwrap_or(false),
                    Ordering::SeqCst,
                );
                let body = InitializeResponseBody {
                    supports_configuration_done_request: true,
                    supports_exception_info_request: true,
                    exception_breakpoint_filters: self.exceptions.filter_list(),
                    cobble_version: VersionTriple::current(),
                };
                let mut out = self.out.lock().unwrap();
                out.respond_body(&req, &body)?;
                // The initialized event must trail the marshaled response.
                out.send_event(Event::Initialized)?;
            }
            "launch" => self.out.lock().unwrap().respond_success(&req)?,
            "configurationDone" => {
                self.out.lock().unwrap().respond_success(&req)?;
                self.configuration_done_event.fire();
            }
            "threads" => {
                let threads = {
                    let state = self.threads.lock().unwrap();
                    state
                        .default_thread
                        .and_then(|id| state.manager.thread(id))
                        .map(|t| {
                            vec![ThreadInfo {
                                id: t.id(),
                                name: t.name().to_string(),
                            }]
                        })
                        .unwrap_or_default()
                };
                self.out
                    .lock()
                    .unwrap()
                    .respond_body(&req, &ThreadsResponseBody { threads })?;
            }
            "stackTrace" => {
                let args: StackTraceArguments = parse_args(&req.arguments)?;
                let response = self
                    .threads
                    .lock()
                    .unwrap()
                    .manager
                    .stack_trace_response(args.thread_id);
                let mut out = self.out.lock().unwrap();
                match response {
                    Some(body) => out.respond_body(&req, &body)?,
                    None => {
                        out.respond_error(&req, format!("Unknown threadId '{}'", args.thread_id))?
                    }
                }
            }
            "scopes" => {
                let args: ScopesArguments = parse_args(&req.arguments)?;
                let supports_variable_type = self.supports_variable_type.load(Ordering::SeqCst);
                let scopes = {
                    let mut state = self.threads.lock().unwrap();
                    match state.default_thread {
                        Some(id) => state
                            .manager
                            .thread_mut(id)
                            .map(|t| t.scopes(args.frame_id, supports_variable_type))
                            .unwrap_or_default(),
                        None => Vec::new(),
                    }
                };
                self.out
                    .lock()
                    .unwrap()
                    .respond_body(&req, &ScopesResponseBody { scopes })?;
            }
            "variables" => {
                let args: VariablesArguments = parse_args(&req.arguments)?;
                let variables = self.registry.resolve(args.variables_reference);
                self.out
                    .lock()
                    .unwrap()
                    .respond_body(&req, &VariablesResponseBody { variables })?;
            }
            "evaluate" => {
                let args: EvaluateArguments = parse_args(&req.arguments)?;
                let mut body = EvaluateResponseBody::default();
                if let Some(frame_id) = args.frame_id {
                    let frame = {
                        let state = self.threads.lock().unwrap();
                        state
                            .default_thread
                            .and_then(|id| state.manager.thread(id))
                            .and_then(|t| t.frame(frame_id))
                    };
                    if let Some(value) =
                        frame.and_then(|frame| frame.context().variable(&args.expression))
                    {
                        body.result = value;
                        body.r#type = Some("string".to_string());
                    }
                }
                self.out.lock().unwrap().respond_body(&req, &body)?;
            }
            "pause" => {
                self.pause_request.store(true, Ordering::SeqCst);
                self.out.lock().unwrap().respond_success(&req)?;
            }
            "continue" => {
                self.clear_step_requests();
                self.continue_sem.notify();
                self.out.lock().unwrap().respond_body(
                    &req,
                    &ContinueResponseBody {
                        all_threads_continued: true,
                    },
                )?;
            }
            "next" => {
                self.next_step_from
                    .store(self.current_stack_size(), Ordering::SeqCst);
                self.continue_sem.notify();
                self.out.lock().unwrap().respond_success(&req)?;
            }
            "stepIn" => {
                // Stops on whatever frame entry comes next: stepped in,
                // stepped over a single line, or stepped out.
                self.step_in_request.store(true, Ordering::SeqCst);
                self.continue_sem.notify();
                self.out.lock().unwrap().respond_success(&req)?;
            }
            "stepOut" => {
                self.step_out_depth
                    .store(self.current_stack_size() - 1, Ordering::SeqCst);
                self.continue_sem.notify();
                self.out.lock().unwrap().respond_success(&req)?;
            }
            "setBreakpoints" => {
                let args: SetBreakpointsArguments = parse_args(&req.arguments)?;
                let body = self.breakpoints.handle_set_breakpoints(&args);
                self.out.lock().unwrap().respond_body(&req, &body)?;
            }
            "setExceptionBreakpoints" => {
                let args: SetExceptionBreakpointsArguments = parse_args(&req.arguments)?;
                self.exceptions
                    .handle_set_exception_breakpoints(&args.filters);
                self.out.lock().unwrap().respond_success(&req)?;
            }
            "exceptionInfo" => {
                let info = self.exceptions.handle_exception_info();
                let mut out = self.out.lock().unwrap();
                match info {
                    Some(body) => out.respond_body(&req, &body)?,
                    None => out.respond_success(&req)?,
                }
            }
            "disconnect" => {
                self.out.lock().unwrap().respond_success(&req)?;
                self.disconnect_cleanup();
            }
            command => return Err(CodecError::UnsupportedCommand(command.to_string())),
        }
        Ok(())
    }

    fn begin_function(
        &self,
        context: Arc<dyn FrameContext>,
        source_path: &str,
        function_name: &str,
        line: i64,
    ) {
        let (thread_id, depth) = {
            let mut state = self.threads.lock().unwrap();
            let Some(id) = state.default_thread else {
                return;
            };
            let Some(thread) = state.manager.thread_mut(id) else {
                return;
            };
            thread.push_frame(context, source_path, function_name, line);
            (id, thread.stack_frame_size() as i64)
        };

        if line == 0 {
            // File-load sentinel; execution has not reached a command yet.
            return;
        }

        let hits = self.breakpoints.breakpoints_at(source_path, line);
        let step_satisfied = depth <= self.next_step_from.load(Ordering::SeqCst)
            || self.step_in_request.load(Ordering::SeqCst)
            || depth <= self.step_out_depth.load(Ordering::SeqCst);
        let pause_requested = self.pause_request.load(Ordering::SeqCst);

        let mut event = StoppedEventBody {
            thread_id: Some(thread_id),
            all_threads_stopped: Some(true),
            ..Default::default()
        };
        if !hits.is_empty() {
            event.reason = "breakpoint";
            event.hit_breakpoint_ids = Some(hits);
        } else if step_satisfied {
            event.reason = "step";
        } else if pause_requested {
            event.reason = "pause";
        } else {
            return;
        }

        self.clear_step_requests();
        self.send_event(Event::Stopped(event));
        self.continue_sem.wait();
    }

    fn check_exception(&self, severity: Severity, text: &str) {
        let Some(mut event) = self.exceptions.check(severity, text) else {
            return;
        };
        let Some(thread_id) = self.threads.lock().unwrap().default_thread else {
            return;
        };
        event.thread_id = Some(thread_id);
        self.send_event(Event::Stopped(event));
        self.continue_sem.wait();
    }

    fn report_exit(&self, exit_code: i64) {
        let thread_id = {
            let mut state = self.threads.lock().unwrap();
            let Some(id) = state.default_thread.take() else {
                return;
            };
            state.manager.end_thread(id);
            id
        };

        if self.session_active.load(Ordering::SeqCst) {
            self.send_event(Event::Thread(ThreadEventBody {
                reason: "exited",
                thread_id,
            }));
            self.send_event(Event::Exited(ExitedEventBody { exit_code }));
            self.send_event(Event::Terminated);
        }

        // Let the client drain responses and disconnect at its own pace.
        self.disconnect_event.wait();
    }

    fn current_stack_size(&self) -> i64 {
        let state = self.threads.lock().unwrap();
        state
            .default_thread
            .and_then(|id| state.manager.thread(id))
            .map(|t| t.stack_frame_size() as i64)
            .unwrap_or(0)
    }

    fn clear_step_requests(&self) {
        self.next_step_from.store(i64::MIN, Ordering::SeqCst);
        self.step_in_request.store(false, Ordering::SeqCst);
        self.step_out_depth.store(i64::MIN, Ordering::SeqCst);
        self.pause_request.store(false, Ordering::SeqCst);
    }

    fn send_event(&self, event: Event) {
        let result = self.out.lock().unwrap().send_event(event);
        if let Err(err) = result {
            // Writing failed, so the client is gone; unwind like a
            // disconnect so a stopped interpreter is not left hanging.
            self.session_error(&err.to_string());
        }
    }

    fn session_error(&self, msg: &str) {
        log::error!("DAP session error: {msg}");
        eprintln!("DAP session error: {msg}");
        self.disconnect_cleanup();
    }

    fn disconnect_cleanup(&self) {
        self.breakpoints.clear_all();
        self.exceptions.clear_all();
        self.clear_step_requests();
        self.continue_sem.notify();
        // A constructor still waiting for configuration must not hang on a
        // session that just died.
        self.configuration_done_event.fire();
        self.disconnect_event.fire();
        self.session_active.store(false, Ordering::SeqCst);
    }
}

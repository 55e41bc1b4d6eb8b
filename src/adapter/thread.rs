//! Call-stack model of the debuggee: stack frames, the (single) script
//! thread, and the thread manager serving stack-trace requests.
//!
//! All state in this module is guarded by the adapter mutex; nothing here
//! takes its own lock apart from the registry's.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use itertools::Itertools;

use crate::adapter::variables::{self, CollectionLink, VariableEntry, VariablesRegistry};
use crate::host::FrameContext;
use crate::protocol::{ScopeInfo, Source, StackFrameInfo, StackTraceResponseBody};

static NEXT_FRAME_ID: AtomicI64 = AtomicI64::new(1);

/// One interpreter function invocation on the call stack.
pub struct StackFrame {
    id: i64,
    source_path: String,
    function_name: String,
    line: i64,
    context: Arc<dyn FrameContext>,
}

impl StackFrame {
    fn new(
        context: Arc<dyn FrameContext>,
        source_path: &str,
        function_name: &str,
        line: i64,
    ) -> StackFrame {
        StackFrame {
            id: NEXT_FRAME_ID.fetch_add(1, Ordering::SeqCst),
            source_path: source_path.to_string(),
            function_name: function_name.to_string(),
            line,
            context,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn line(&self) -> i64 {
        self.line
    }

    pub fn context(&self) -> &Arc<dyn FrameContext> {
        &self.context
    }
}

pub struct DebuggerThread {
    id: i64,
    name: String,
    frames: Vec<Arc<StackFrame>>,
    frame_scopes: HashMap<i64, Vec<ScopeInfo>>,
    frame_variables: HashMap<i64, Vec<i64>>,
    registry: Arc<VariablesRegistry>,
}

impl DebuggerThread {
    fn new(id: i64, name: &str, registry: Arc<VariablesRegistry>) -> DebuggerThread {
        DebuggerThread {
            id,
            name: name.to_string(),
            frames: Vec::new(),
            frame_scopes: HashMap::new(),
            frame_variables: HashMap::new(),
            registry,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn push_frame(
        &mut self,
        context: Arc<dyn FrameContext>,
        source_path: &str,
        function_name: &str,
        line: i64,
    ) -> i64 {
        let frame = StackFrame::new(context, source_path, function_name, line);
        log::trace!(
            "push frame {} {}:{line} ({})",
            frame.id,
            source_path,
            frame.function_name
        );
        let id = frame.id;
        self.frames.push(Arc::new(frame));
        id
    }

    /// Pop the top frame and tear down everything attributed to it.
    pub fn pop_frame(&mut self) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        self.frame_scopes.remove(&frame.id);
        if let Some(references) = self.frame_variables.remove(&frame.id) {
            for reference in references {
                self.registry.unregister(reference);
            }
        }
    }

    pub fn frame(&self, frame_id: i64) -> Option<Arc<StackFrame>> {
        self.frames.iter().find(|f| f.id == frame_id).cloned()
    }

    pub fn stack_frame_size(&self) -> usize {
        self.frames.len()
    }

    /// Scopes of a frame, materialized lazily and cached until the frame is
    /// popped. An unknown frame id (the client kept a stale handle) yields
    /// an empty list.
    pub fn scopes(&mut self, frame_id: i64, supports_variable_type: bool) -> Vec<ScopeInfo> {
        if let Some(scopes) = self.frame_scopes.get(&frame_id) {
            return scopes.clone();
        }
        let Some(frame) = self.frame(frame_id) else {
            return Vec::new();
        };

        let context = frame.context.clone();
        let cache_reference = variables::leaf_collection(
            &self.registry,
            move || {
                context
                    .variable_names()
                    .into_iter()
                    .map(|name| {
                        let value = context.variable(&name).unwrap_or_default();
                        VariableEntry::string(name, value)
                    })
                    .collect()
            },
            supports_variable_type,
            true,
            true,
        );

        let line = frame.line;
        let locals_reference = variables::composite(
            &self.registry,
            vec![CollectionLink {
                name: "Cache Variables".to_string(),
                reference: cache_reference,
            }],
            move || vec![VariableEntry::int("CurrentLine", line)],
            supports_variable_type,
            false,
        );

        self.frame_variables
            .entry(frame_id)
            .or_default()
            .extend([cache_reference, locals_reference]);

        let scopes = vec![ScopeInfo {
            name: "Locals".to_string(),
            presentation_hint: Some("locals".to_string()),
            variables_reference: locals_reference,
            expensive: false,
            source: Some(Source::from_path(frame.source_path.clone())),
        }];
        self.frame_scopes.insert(frame_id, scopes.clone());
        scopes
    }

    /// Frames top to bottom. Line-0 frames are file-load sentinels and are
    /// not shown to the client.
    pub fn stack_trace(&self) -> StackTraceResponseBody {
        let stack_frames = self
            .frames
            .iter()
            .rev()
            .filter(|frame| frame.line != 0)
            .map(|frame| StackFrameInfo {
                id: frame.id,
                name: format!("{} Line {}", frame.source_path, frame.line),
                line: frame.line,
                column: 1,
                source: Some(Source::from_path(frame.source_path.clone())),
            })
            .collect_vec();
        StackTraceResponseBody {
            total_frames: stack_frames.len() as i64,
            stack_frames,
        }
    }
}

/// Live debuggee threads. This host runs a single script thread, but the
/// bookkeeping does not depend on that. Ids count up from 1, so the primary
/// script thread is always thread 1.
pub struct ThreadManager {
    threads: Vec<DebuggerThread>,
    next_thread_id: i64,
}

impl Default for ThreadManager {
    fn default() -> ThreadManager {
        ThreadManager {
            threads: Vec::new(),
            next_thread_id: 1,
        }
    }
}

impl ThreadManager {
    pub fn start_thread(&mut self, name: &str, registry: Arc<VariablesRegistry>) -> i64 {
        let id = self.next_thread_id;
        self.next_thread_id += 1;
        self.threads.push(DebuggerThread::new(id, name, registry));
        id
    }

    pub fn end_thread(&mut self, id: i64) {
        self.threads.retain(|t| t.id != id);
    }

    pub fn thread(&self, id: i64) -> Option<&DebuggerThread> {
        self.threads.iter().find(|t| t.id == id)
    }

    pub fn thread_mut(&mut self, id: i64) -> Option<&mut DebuggerThread> {
        self.threads.iter_mut().find(|t| t.id == id)
    }

    pub fn stack_trace_response(&self, id: i64) -> Option<StackTraceResponseBody> {
        self.thread(id).map(DebuggerThread::stack_trace)
    }
}

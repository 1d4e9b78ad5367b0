/// User-configurable settings for the python vm.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Settings {
    /// Frames a thread may have on its call stack before RecursionError is raised.
    ///
    /// The native stack must be large enough to hold them; see
    /// [`run_with_interpreter_stack`](crate::vm::thread::run_with_interpreter_stack).
    pub recursion_limit: usize,

    /// sys.argv
    pub argv: Vec<String>,

    /// sys.path, the directories searched by `import`
    pub path: Vec<String>,

    /// -d, also dump the frame chain of an unhandled exception
    pub debug: bool,

    /// -q
    pub quiet: bool,
}

impl Settings {
    pub fn with_argv(mut self, argv: Vec<String>) -> Self {
        self.argv = argv;
        self
    }

    pub fn with_path(mut self, path: Vec<String>) -> Self {
        self.path = path;
        self
    }
}

/// Sensible default settings.
impl Default for Settings {
    fn default() -> Self {
        Self {
            recursion_limit: 1000,
            argv: vec![],
            path: vec![],
            debug: false,
            quiet: false,
        }
    }
}

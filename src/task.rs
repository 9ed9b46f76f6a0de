/// A unit of work executed by a pool worker
///
/// A `ThreadPool` instance only accepts a single type of task, represented by
/// implementations of `Task`. To submit arbitrary closures to the same pool,
/// use `Box<dyn TaskBox>` as the task type and `ThreadPool::submit_fn`.
pub trait Task: Send + 'static {
    /// Run the task
    fn run(self);
}

/// Object safe version of `Task`, used behind a `Box`
pub trait TaskBox: Send + 'static {
    /// Run the boxed task
    fn run_box(self: Box<Self>);
}

impl<F> Task for F
where
    F: FnOnce() + Send + 'static,
{
    fn run(self) {
        (self)()
    }
}

impl<T: Task> TaskBox for T {
    fn run_box(self: Box<Self>) {
        (*self).run()
    }
}

impl Task for Box<dyn TaskBox> {
    fn run(self) {
        self.run_box()
    }
}

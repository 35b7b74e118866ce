mod builder;
mod handle;
mod loops;
mod scheduler;

pub use builder::SchedulerBuilder;
pub use scheduler::Scheduler;

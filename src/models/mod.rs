pub mod activity;
pub mod audit_log;
pub mod automation;
pub mod contact;
pub mod event;
pub mod message;
pub mod opportunity;
pub mod workflow_run;
pub mod workflow_step_run;
pub mod workspace;

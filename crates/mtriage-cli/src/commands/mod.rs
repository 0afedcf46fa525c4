pub mod analysers;
pub mod dev;
pub mod export;
pub mod pipeline_helper;
pub mod run;
pub mod scaffold;

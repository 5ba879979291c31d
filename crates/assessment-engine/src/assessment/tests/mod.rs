mod batch;
mod common;
mod indicators;
mod researchers;

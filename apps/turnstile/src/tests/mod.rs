mod admission_flow;
mod handoff_flow;

mod dead_code;
mod fission;
mod flatten;
mod pipeline;
mod unroll;

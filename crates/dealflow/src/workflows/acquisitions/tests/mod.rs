mod blast;
mod common;
mod matching;
mod service;

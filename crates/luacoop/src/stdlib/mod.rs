// VM intrinsics: the base functions and the coroutine library

pub mod basic;
pub mod coroutine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stdlib {
    Basic,
    Coroutine,

    All,
}

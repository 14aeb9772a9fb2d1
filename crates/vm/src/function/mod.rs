mod argument;

pub use argument::FuncArgs;

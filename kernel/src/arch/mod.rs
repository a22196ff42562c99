//! Architecture support. This kernel targets x86_64 only; the module split
//! mirrors where a second architecture would go, but nothing else in the
//! tree is written generically over it.

pub mod x86_64;

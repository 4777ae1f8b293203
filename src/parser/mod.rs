//! MSG container parsing: compound-file reader, typed property access, and
//! the email model builder.

pub mod cfb;
pub mod msg;
pub mod properties;

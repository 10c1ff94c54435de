pub mod vercel;

pub use vercel::VercelProvider;

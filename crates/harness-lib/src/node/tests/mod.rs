#[cfg(unix)]
mod daemon;

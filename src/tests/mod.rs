mod helpers;
mod redis;
mod sessions;

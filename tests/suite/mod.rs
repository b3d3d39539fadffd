mod capacity;
mod concurrency;
mod preview_confirm;

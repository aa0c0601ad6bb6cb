pub fn abort_with_message(msg: &str) -> ! {
    panic!("{}", msg);
}

pub fn in_interrupt() -> bool {
    false
}

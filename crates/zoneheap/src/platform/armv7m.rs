use cortex_m::peripheral::scb::VectActive;
use cortex_m::peripheral::SCB;

pub fn abort_with_message(_msg: &str) -> ! {
    // On target the message is recovered by the debugger from the call site;
    // trap immediately with an undefined instruction.
    cortex_m::asm::udf()
}

pub fn in_interrupt() -> bool {
    !matches!(SCB::vect_active(), VectActive::ThreadMode)
}

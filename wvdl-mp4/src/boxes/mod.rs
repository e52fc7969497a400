//! Parsers for the mp4 boxes that carry track and encryption information.

mod schm;
mod senc;
mod tenc;
mod tfhd;
mod tkhd;
mod trex;
mod trun;

pub use schm::SchmBox;
pub use senc::{SencBox, SencSample, SencSubsample};
pub use tenc::TencBox;
pub use tfhd::TfhdBox;
pub use tkhd::TkhdBox;
pub use trex::TrexBox;
pub use trun::TrunBox;

#[macro_export]
macro_rules! data {
    () => {
        std::rc::Rc::new(std::cell::RefCell::new(None))
    };
    ($val:expr) => {
        std::rc::Rc::new(std::cell::RefCell::new($val))
    };
}

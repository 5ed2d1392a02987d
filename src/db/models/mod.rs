pub mod campaign;
pub mod ledger;
pub mod member;
pub mod purchase;
pub mod tier;
pub mod token;
pub mod voucher;

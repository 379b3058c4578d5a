/// A canned conformance-test account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestAccount {
    pub jid: &'static str,
    pub name: &'static str,
}

pub const ALICE: TestAccount = TestAccount {
    jid: "alice@example.com",
    name: "Alice",
};

pub const BOB: TestAccount = TestAccount {
    jid: "bob@example.com",
    name: "Bob",
};

pub const CAROL: TestAccount = TestAccount {
    jid: "carol@example.com",
    name: "Carol",
};

pub const ACCOUNTS: [TestAccount; 3] = [ALICE, BOB, CAROL];

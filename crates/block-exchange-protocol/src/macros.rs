macro_rules! check_length {
    ($got:expr, $expected:expr) => {
        if $got < $expected {
            return Err($crate::Error::BadLength {
                expected: $expected,
                got: $got,
            });
        }
    };
}

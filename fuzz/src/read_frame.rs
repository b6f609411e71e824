#![no_main]

#[macro_use]
extern crate libfuzzer_sys;

// Fuzzer for the frame codec. Arbitrary input must never crash or read past
// the provided end, and a successful decode must be stable under extension
// of the input.
fuzz_target!(|data: &[u8]| {
    let mut b = octets::Octets::with_slice(data);

    let res = frame_fields(&mut b);

    assert!(b.off() <= data.len());

    if let Some((ty, length, header_size, payload)) = res {
        let mut extended = data.to_vec();
        extended.push(0xba);

        let mut b = octets::Octets::with_slice(&extended);

        assert_eq!(
            frame_fields(&mut b),
            Some((ty, length, header_size, payload))
        );
    }
});

fn frame_fields(
    b: &mut octets::Octets<'_>,
) -> Option<(u8, u64, usize, Vec<u8>)> {
    match galette::frame::read_frame(b) {
        Ok(frame) =>
            Some((frame.ty, frame.length, frame.header_size, frame.payload.to_vec())),

        Err(galette::Error::Incomplete) |
        Err(galette::Error::MalformedFrame(..)) => None,

        Err(e) => panic!("unexpected error {e:?}"),
    }
}

#![no_main]

use libfuzzer_sys::fuzz_target;
use modbus_ws_poller::codec::{decode_response, parse_response, transaction_id_of};
use modbus_ws_poller::DeviceClass;

fuzz_target!(|data: &[u8]| {
    let _ = transaction_id_of(data);

    if let Ok(response) = parse_response(data) {
        // A parsed frame never claims more payload than it carried
        assert!(response.data().len() <= data.len());
    }

    if let Ok(response) = decode_response(data) {
        for class in [DeviceClass::Hygrometer, DeviceClass::VoltageSensor] {
            let _ = class.decode(response.data());
        }
    }
});

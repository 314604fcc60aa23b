use std::net::Ipv4Addr;

use log::warn;
use windows::Win32::Foundation::ERROR_BUFFER_OVERFLOW;
use windows::Win32::Foundation::NO_ERROR;
use windows::Win32::NetworkManagement::IpHelper::GetAdaptersAddresses;
use windows::Win32::NetworkManagement::IpHelper::GAA_FLAG_INCLUDE_PREFIX;
use windows::Win32::NetworkManagement::IpHelper::IP_ADAPTER_ADDRESSES_LH;
use windows::Win32::Networking::WinSock::AF_INET;
use windows::Win32::Networking::WinSock::SOCKADDR_IN;

pub(crate) fn ipv4_addresses() -> Vec<Ipv4Addr> {
    let family = AF_INET.0 as u32;
    let flags = GAA_FLAG_INCLUDE_PREFIX;

    let mut buffer_length: u32 = 0;
    let ret = unsafe { GetAdaptersAddresses(family, flags, None, None, &mut buffer_length) };
    if ret != ERROR_BUFFER_OVERFLOW.0 {
        warn!("GetAdaptersAddresses size query failed: {ret}");
        return Vec::new();
    }

    // u64 elements keep the adapter list correctly aligned
    let mut buffer = vec![0u64; (buffer_length as usize).div_ceil(8)];
    let adapter_addresses_ptr = buffer.as_mut_ptr() as *mut IP_ADAPTER_ADDRESSES_LH;

    let ret = unsafe {
        GetAdaptersAddresses(
            family,
            flags,
            None,
            Some(adapter_addresses_ptr),
            &mut buffer_length,
        )
    };
    if ret != NO_ERROR.0 {
        warn!("GetAdaptersAddresses failed: {ret}");
        return Vec::new();
    }

    let mut addrs = Vec::new();

    let mut adapter = adapter_addresses_ptr;
    while !adapter.is_null() {
        let adapter_ref: &IP_ADAPTER_ADDRESSES_LH = unsafe { &*adapter };

        let mut unicast = adapter_ref.FirstUnicastAddress;
        while !unicast.is_null() {
            let address = unsafe { (*unicast).Address.lpSockaddr };
            if !address.is_null() && unsafe { (*address).sa_family } == AF_INET {
                let sockaddr_in = unsafe { &*(address as *const SOCKADDR_IN) };
                let addr_bytes = unsafe { sockaddr_in.sin_addr.S_un.S_addr.to_ne_bytes() };
                addrs.push(Ipv4Addr::from(addr_bytes));
            }

            unicast = unsafe { (*unicast).Next };
        }

        adapter = adapter_ref.Next;
    }

    addrs
}

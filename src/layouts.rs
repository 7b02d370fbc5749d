binary_layout::binary_layout!(rdm_package_layout, BigEndian, {
    start_code: u8,
    sub_start_code: u8,
    message_length: u8,
    destination_uid: [u8; 6],
    source_uid: [u8; 6],
    transaction_number: u8,
    port_id_response_type: u8,
    message_count: u8,
    sub_device: u16,
    command_class: u8,
    parameter_id: u16,
    parameter_data_length: u8,
    parameter_data_and_checksum: [u8],
});

binary_layout::binary_layout!(rdm_device_info_layout, BigEndian, {
    protocol_version: u16,
    device_model_id: u16,
    product_category: u16,
    software_version_id: u32,
    dmx_footprint: u16,
    dmx_personality: u16,
    dmx_start_address: u16,
    sub_device_count: u16,
    sensor_count: u8,
});

// Art-Net is little endian except for the fields stored as byte pairs, those are hi/lo.

binary_layout::binary_layout!(art_header_layout, LittleEndian, {
    id: [u8; 8],
    op_code: u16,
    protocol_version: [u8; 2],
});

binary_layout::binary_layout!(art_poll_layout, LittleEndian, {
    id: [u8; 8],
    op_code: u16,
    protocol_version: [u8; 2],
    flags: u8,
    diag_priority: u8,
    target_top: [u8; 2],
    target_bottom: [u8; 2],
});

binary_layout::binary_layout!(art_dmx_layout, LittleEndian, {
    id: [u8; 8],
    op_code: u16,
    protocol_version: [u8; 2],
    sequence: u8,
    physical: u8,
    sub_uni: u8,
    net: u8,
    length: [u8; 2],
    data: [u8],
});

binary_layout::binary_layout!(art_poll_reply_layout, LittleEndian, {
    id: [u8; 8],
    op_code: u16,
    ip_address: [u8; 4],
    port: u16,
    version_info: [u8; 2],
    net_switch: u8,
    sub_switch: u8,
    oem: [u8; 2],
    ubea_version: u8,
    status1: u8,
    esta_manufacturer: u16,
    short_name: [u8; 18],
    long_name: [u8; 64],
    node_report: [u8; 64],
    num_ports: [u8; 2],
    port_types: [u8; 4],
    good_input: [u8; 4],
    good_output_a: [u8; 4],
    sw_in: [u8; 4],
    sw_out: [u8; 4],
    acn_priority: u8,
    sw_macro: u8,
    sw_remote: u8,
    spare: [u8; 3],
    style: u8,
    mac_address: [u8; 6],
    bind_ip: [u8; 4],
    bind_index: u8,
    status2: u8,
    good_output_b: [u8; 4],
    status3: u8,
    default_responder: [u8; 6],
    user: [u8; 2],
    refresh_rate: [u8; 2],
    filler: [u8; 11],
});

binary_layout::binary_layout!(art_address_layout, LittleEndian, {
    id: [u8; 8],
    op_code: u16,
    protocol_version: [u8; 2],
    net_switch: u8,
    bind_index: u8,
    short_name: [u8; 18],
    long_name: [u8; 64],
    sw_in: [u8; 4],
    sw_out: [u8; 4],
    sub_switch: u8,
    acn_priority: u8,
    command: u8,
});

binary_layout::binary_layout!(art_rdm_layout, LittleEndian, {
    id: [u8; 8],
    op_code: u16,
    protocol_version: [u8; 2],
    rdm_version: u8,
    filler: u8,
    spare: [u8; 7],
    net: u8,
    command: u8,
    address: u8,
    rdm_package: [u8],
});

binary_layout::binary_layout!(art_tod_request_layout, LittleEndian, {
    id: [u8; 8],
    op_code: u16,
    protocol_version: [u8; 2],
    filler: [u8; 2],
    spare: [u8; 7],
    net: u8,
    command: u8,
    address_count: u8,
    addresses: [u8],
});

binary_layout::binary_layout!(art_tod_control_layout, LittleEndian, {
    id: [u8; 8],
    op_code: u16,
    protocol_version: [u8; 2],
    filler: [u8; 2],
    spare: [u8; 7],
    net: u8,
    command: u8,
    address: u8,
});

binary_layout::binary_layout!(art_tod_data_layout, LittleEndian, {
    id: [u8; 8],
    op_code: u16,
    protocol_version: [u8; 2],
    rdm_version: u8,
    port: u8,
    spare: [u8; 6],
    bind_index: u8,
    net: u8,
    command_response: u8,
    address: u8,
    uid_total: [u8; 2],
    block_count: u8,
    uid_count: u8,
    tod: [u8],
});
